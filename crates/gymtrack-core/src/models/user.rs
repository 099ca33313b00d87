use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in account as returned by `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl User {
    /// An account record without an id is treated as "nobody signed in".
    pub fn has_identity(&self) -> bool {
        self.id > 0
    }

    /// Copy of this user with a new display name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Avatar URL served by the API, if the user has uploaded one
    pub fn avatar_url(&self, api_url: &str) -> Option<String> {
        self.avatar
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| format!("{}/avatar/{}", api_url.trim_end_matches('/'), a))
    }
}

/// Token pair stored alongside the user.
///
/// `issued_at` is local bookkeeping only; records written before it existed
/// deserialize with the load time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            token: token.into(),
            refresh_token,
            issued_at: Utc::now(),
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Minutes since the access token was issued (for display)
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.issued_at).num_minutes().max(0)
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Body of `PUT /users`.
#[derive(Clone, Serialize)]
pub struct ProfileUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<String>,
}

impl ProfileUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
            old_password: None,
        }
    }

    pub fn with_password_change(mut self, old_password: String, password: String) -> Self {
        self.old_password = Some(old_password);
        self.password = Some(password);
        self
    }
}

impl fmt::Debug for ProfileUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileUpdate")
            .field("name", &self.name)
            .field("changes_password", &self.password.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> User {
        User {
            id: 7,
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            avatar: None,
        }
    }

    #[test]
    fn test_user_identity() {
        assert!(user().has_identity());
        let nobody = User { id: 0, ..user() };
        assert!(!nobody.has_identity());
    }

    #[test]
    fn test_user_parses_without_avatar() {
        let json = r#"{"id": 3, "name": "Rui", "email": "rui@example.com"}"#;
        let parsed: User = serde_json::from_str(json).expect("valid user json");
        assert_eq!(parsed.avatar, None);
        assert_eq!(parsed.id, 3);
    }

    #[test]
    fn test_avatar_url() {
        let mut u = user();
        assert_eq!(u.avatar_url("http://localhost:3333"), None);
        u.avatar = Some("me.png".to_string());
        assert_eq!(
            u.avatar_url("http://localhost:3333/").as_deref(),
            Some("http://localhost:3333/avatar/me.png")
        );
    }

    #[test]
    fn test_credentials_without_issued_at() {
        let parsed: Credentials =
            serde_json::from_str(r#"{"token": "abc"}"#).expect("valid credentials json");
        assert_eq!(parsed.token, "abc");
        assert!(!parsed.can_refresh());
        assert_eq!(parsed.age_minutes(), 0);
    }

    #[test]
    fn test_credentials_age_and_refresh() {
        let mut creds = Credentials::new("abc", Some("r1".to_string()));
        assert!(creds.can_refresh());
        creds.issued_at = Utc::now() - Duration::minutes(42);
        assert_eq!(creds.age_minutes(), 42);

        creds.refresh_token = Some(String::new());
        assert!(!creds.can_refresh());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let creds = Credentials::new("super-secret", Some("also-secret".to_string()));
        let out = format!("{:?}", creds);
        assert!(!out.contains("super-secret"));
        assert!(!out.contains("also-secret"));

        let update = ProfileUpdate::rename("Ana")
            .with_password_change("old-pass".to_string(), "new-pass".to_string());
        let out = format!("{:?}", update);
        assert!(!out.contains("new-pass"));
    }

    #[test]
    fn test_profile_update_body() {
        let body = serde_json::to_value(ProfileUpdate::rename("Ana")).expect("serializable");
        assert_eq!(body, serde_json::json!({"name": "Ana"}));
    }
}
