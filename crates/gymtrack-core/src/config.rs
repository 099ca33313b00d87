//! Application configuration management.
//!
//! Configuration is stored at `~/.config/gymtrack/config.json` and holds the
//! API location, the last email used to sign in, the optional session
//! features and where credentials are kept. `GYMTRACK_API_URL` and
//! `GYMTRACK_EMAIL` override the file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{CredentialStore, SessionOptions};

/// Application name used for config/data directory paths
const APP_NAME: &str = "gymtrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the data dir holding the credential slots
const SESSION_DIR: &str = "session";

/// API used when nothing else is configured (the development server)
const DEFAULT_API_URL: &str = "http://localhost:3333";

const API_URL_ENV: &str = "GYMTRACK_API_URL";
const EMAIL_ENV: &str = "GYMTRACK_EMAIL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where the credential slots live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub last_email: Option<String>,
    pub refresh_tokens: bool,
    pub profile_updates: bool,
    pub credential_backend: CredentialBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            last_email: None,
            refresh_tokens: true,
            profile_updates: true,
            credential_backend: CredentialBackend::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        let mut config: Self = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Let environment variables win over the file
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_url = Some(url);
        }
        if let Some(email) = var(EMAIL_ENV).filter(|v| !v.is_empty()) {
            self.last_email = Some(email);
        }
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDirectory("data"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn log_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            refresh_tokens: self.refresh_tokens,
            profile_updates: self.profile_updates,
        }
    }

    /// Build the credential store this config points at
    pub fn credential_store(&self) -> Result<CredentialStore, ConfigError> {
        Ok(match self.credential_backend {
            CredentialBackend::File => CredentialStore::file(self.data_dir()?.join(SESSION_DIR)),
            CredentialBackend::Keyring => CredentialStore::keyring(APP_NAME),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        assert_eq!(config.session_options(), SessionOptions::default());
        assert_eq!(config.credential_backend, CredentialBackend::File);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_url": "https://gym.example.com", "credential_backend": "keyring"}"#)
            .expect("valid config json");
        assert_eq!(config.api_url(), "https://gym.example.com");
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert!(config.refresh_tokens);
        assert!(config.profile_updates);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config {
            api_url: Some("https://file.example.com".to_string()),
            last_email: Some("file@example.com".to_string()),
            ..Config::default()
        };
        config.apply_env(|key| match key {
            API_URL_ENV => Some("https://env.example.com".to_string()),
            EMAIL_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_url(), "https://env.example.com");
        assert_eq!(config.last_email.as_deref(), Some("file@example.com"));
    }

    #[test]
    fn test_feature_toggles_reach_session_options() {
        let config = Config {
            refresh_tokens: false,
            ..Config::default()
        };
        let options = config.session_options();
        assert!(!options.refresh_tokens);
        assert!(options.profile_updates);
    }
}
