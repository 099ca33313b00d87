//! Authentication module for managing the user session and its credentials.
//!
//! This module provides:
//! - `SessionManager`: the sign-in / sign-out / restore state machine
//! - `CredentialStore`: persisted `user` and `auth` slots over a file,
//!   OS keychain or in-memory backend
//!
//! The user record and the token pair are always written and cleared
//! together; a restore that finds only one of them discards it.

pub mod credentials;
pub mod session;

pub use credentials::{
    CredentialStore, FileSlotStore, KeyringSlotStore, MemorySlotStore, Slot, SlotStore, StoreError,
};
pub use session::{Session, SessionError, SessionManager, SessionOptions, SessionStatus};
