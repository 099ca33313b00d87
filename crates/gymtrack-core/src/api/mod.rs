//! REST API client module for the gym API.
//!
//! This module provides the `ApiClient` for creating sessions, refreshing
//! tokens, editing the profile and listing exercises.
//!
//! Authenticated requests carry a JWT bearer token. When the server rejects
//! that token the client notifies every subscribed `AuthFailureHandler`.

pub mod client;
pub mod error;
pub mod observer;

pub use client::{ApiClient, SessionResponse};
pub use error::ApiError;
pub use observer::{AuthFailure, AuthFailureHandler, AuthFailureSubscription};
