//! Data models for gymtrack entities.
//!
//! This module contains the data structures exchanged with the gym API
//! and persisted locally:
//!
//! - `User`: the signed-in account
//! - `Credentials`: access token and optional refresh token
//! - `ProfileUpdate`: payload for editing the account
//! - `Exercise`: catalog entries listed by muscle group

pub mod exercise;
pub mod user;

pub use exercise::Exercise;
pub use user::{Credentials, ProfileUpdate, User};
