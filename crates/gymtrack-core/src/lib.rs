//! gymtrack core - session lifecycle, API client and models for the gym app.
//!
//! A UI shell creates one [`SessionManager`] at startup, calls
//! [`SessionManager::restore`], and then renders from
//! [`SessionManager::subscribe`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, Session, SessionError, SessionManager, SessionOptions, SessionStatus};
pub use config::{Config, CredentialBackend};
