use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, AuthFailure, AuthFailureSubscription};
use crate::models::{Credentials, ProfileUpdate, User};

use super::credentials::{CredentialStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Startup, before the stored session has been read
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of the process-wide session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub user: Option<User>,
    pub is_loading: bool,
}

impl Session {
    fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            user: None,
            is_loading: true,
        }
    }

    fn authenticated(user: User) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
            is_loading: false,
        }
    }

    fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            is_loading: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Credential storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("Another sign-in or sign-out is already in progress")]
    Busy,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Profile belongs to user {given}, but user {signed_in} is signed in")]
    UserMismatch { given: i64, signed_in: i64 },

    #[error("Sign-in response was missing the user or token")]
    IncompleteResponse,

    #[error("{0} is disabled in configuration")]
    FeatureDisabled(&'static str),
}

impl SessionError {
    /// True when the server refused the email/password or token
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::Api(e) if e.is_auth_failure())
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Optional behaviour, toggled from `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Try the refresh token before giving up on a rejected access token
    pub refresh_tokens: bool,
    /// Allow `update_user_profile` / `update_profile`
    pub profile_updates: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_tokens: true,
            profile_updates: true,
        }
    }
}

struct Inner {
    api: ApiClient,
    store: CredentialStore,
    options: SessionOptions,
    state: watch::Sender<Session>,
    /// Held for the whole of every transition
    transition: AsyncMutex<()>,
    restored: AtomicBool,
    subscription: Mutex<Option<AuthFailureSubscription>>,
}

/// Owns the single session of the process.
///
/// Clones share the same session. Consumers read `current()` or watch
/// `subscribe()`; transitions are `restore`, `sign_in`, `sign_out`,
/// `update_user_profile` and the forced sign-out driven by the API client.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create the manager in `Initializing` and subscribe to auth failures
    pub fn new(api: ApiClient, store: CredentialStore, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(Session::initializing());
        let manager = Self {
            inner: Arc::new(Inner {
                api,
                store,
                options,
                state,
                transition: AsyncMutex::new(()),
                restored: AtomicBool::new(false),
                subscription: Mutex::new(None),
            }),
        };
        manager.attach_auth_failure_handler();
        manager
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn options(&self) -> SessionOptions {
        self.inner.options
    }

    /// Latest session snapshot
    pub fn current(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    /// Receiver that sees every published session snapshot
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// (Re)subscribe the forced sign-out handler. Any previous subscription
    /// is dropped, so exactly one stays active.
    pub fn attach_auth_failure_handler(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let subscription = self.inner.api.on_auth_failure(move |event| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_auth_failure(event).await;
                }
            }
        });
        *self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);
    }

    /// Stop reacting to auth failures
    pub fn shutdown(&self) {
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            debug!("Session manager detached from auth failures");
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Read the stored session. Runs once; later calls return the current
    /// snapshot without touching the store.
    pub async fn restore(&self) -> Session {
        let _guard = self.inner.transition.lock().await;
        if self.inner.restored.swap(true, Ordering::SeqCst) {
            debug!("Session already restored");
            return self.current();
        }
        self.inner.set_loading(true);

        let session = match self.inner.read_stored() {
            Ok(Some((user, credentials))) => {
                self.inner.api.set_auth_header(&credentials.token);
                info!(user_id = user.id, token_age_minutes = credentials.age_minutes(), "Session restored");
                Session::authenticated(user)
            }
            Ok(None) => {
                debug!("No stored session");
                Session::unauthenticated()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored session, signing in again");
                Session::unauthenticated()
            }
        };

        self.inner.publish(session.clone());
        session
    }

    /// Create a session with email and password.
    ///
    /// The user and then the token pair are persisted before the auth header
    /// is set and `Authenticated` is published. Errors are returned as-is.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let _guard = self.inner.begin()?;
        let previous = self.current();
        self.inner.set_loading(true);

        let (user, credentials) = match self.inner.request_session(email, password).await {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "Sign-in failed");
                self.inner.publish(Self::settled(previous));
                return Err(e);
            }
        };

        if let Err(e) = self.inner.persist(&user, &credentials) {
            error!(error = %e, "Failed to persist new session");
            self.inner.discard_stored();
            self.inner.api.clear_auth_header();
            self.inner.publish(Session::unauthenticated());
            return Err(e.into());
        }

        self.inner.api.set_auth_header(&credentials.token);
        info!(user_id = user.id, "Signed in");
        self.inner.publish(Session::authenticated(user.clone()));
        Ok(user)
    }

    /// Clear the stored and in-memory session. Safe to call when already
    /// signed out; persistence errors are logged, not returned.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let _guard = self.inner.begin()?;
        self.inner.sign_out_locked();
        Ok(())
    }

    /// Replace the signed-in user, in the store first and then in memory.
    /// Leaves the token pair and loading flag alone. `user` must have the
    /// signed-in user's id.
    pub async fn update_user_profile(&self, user: User) -> Result<(), SessionError> {
        if !self.inner.options.profile_updates {
            return Err(SessionError::FeatureDisabled("Profile updates"));
        }
        let _guard = self.inner.begin()?;
        self.inner.replace_user(user.id, |_| user)?;
        Ok(())
    }

    /// Send a profile change to the API, then apply the new name locally.
    ///
    /// The rename lands on the user signed in once the request completes, and
    /// only if that is still the user the change was sent for.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, SessionError> {
        if !self.inner.options.profile_updates {
            return Err(SessionError::FeatureDisabled("Profile updates"));
        }
        let user_id = self
            .current()
            .user
            .map(|u| u.id)
            .ok_or(SessionError::NotAuthenticated)?;

        self.inner.api.update_profile(update).await?;

        let _guard = self.inner.transition.lock().await;
        self.inner
            .replace_user(user_id, |current| current.renamed(update.name.clone()))
    }

    /// Trade the stored refresh token for a new token pair now
    pub async fn refresh_credentials(&self) -> Result<(), SessionError> {
        if !self.inner.options.refresh_tokens {
            return Err(SessionError::FeatureDisabled("Token refresh"));
        }
        let _guard = self.inner.begin()?;
        if !self.current().is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let credentials = self
            .inner
            .store
            .credentials()?
            .ok_or(SessionError::NotAuthenticated)?;
        self.inner.refresh_locked(&credentials).await
    }

    /// State to publish after a failed transition: whatever we had, no
    /// longer loading
    fn settled(previous: Session) -> Session {
        match previous.status {
            SessionStatus::Initializing => Session::unauthenticated(),
            _ => Session {
                is_loading: false,
                ..previous
            },
        }
    }
}

impl Inner {
    fn publish(&self, session: Session) {
        self.state.send_replace(session);
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_modify(|s| s.is_loading = loading);
    }

    /// Take the transition guard or report that another transition is running
    fn begin(&self) -> Result<AsyncMutexGuard<'_, ()>, SessionError> {
        self.transition.try_lock().map_err(|_| {
            debug!("Transition rejected, another one is in progress");
            SessionError::Busy
        })
    }

    /// Both slots, or `None` if either is missing. An orphaned slot is removed.
    fn read_stored(&self) -> Result<Option<(User, Credentials)>, StoreError> {
        let user = self.store.user()?.filter(User::has_identity);
        let credentials = self.store.credentials()?;

        match (user, credentials) {
            (Some(user), Some(credentials)) => Ok(Some((user, credentials))),
            (Some(_), None) => {
                warn!("Stored user has no token, discarding it");
                if let Err(e) = self.store.remove_user() {
                    warn!(error = %e, "Failed to remove orphaned user");
                }
                Ok(None)
            }
            (None, Some(_)) => {
                warn!("Stored token has no user, discarding it");
                if let Err(e) = self.store.remove_credentials() {
                    warn!(error = %e, "Failed to remove orphaned token");
                }
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    async fn request_session(&self, email: &str, password: &str) -> Result<(User, Credentials), SessionError> {
        let response = self.api.create_session(email, password).await?;
        response.into_parts().ok_or(SessionError::IncompleteResponse)
    }

    /// User first, then the token pair
    fn persist(&self, user: &User, credentials: &Credentials) -> Result<(), StoreError> {
        self.store.save_user(user)?;
        self.store.save_credentials(credentials)
    }

    /// Swap in a new record for the signed-in user `user_id`. Caller holds
    /// the transition guard.
    fn replace_user(&self, user_id: i64, update: impl FnOnce(&User) -> User) -> Result<User, SessionError> {
        let current = self.state.borrow().clone();
        let signed_in = match &current.user {
            Some(user) if current.is_authenticated() => user,
            _ => return Err(SessionError::NotAuthenticated),
        };
        if signed_in.id != user_id {
            warn!(given = user_id, signed_in = signed_in.id, "Profile update for another user, dropping it");
            return Err(SessionError::UserMismatch {
                given: user_id,
                signed_in: signed_in.id,
            });
        }

        let user = update(signed_in);
        self.store.save_user(&user)?;
        debug!(user_id = user.id, "Profile updated");
        self.publish(Session {
            user: Some(user.clone()),
            ..current
        });
        Ok(user)
    }

    fn discard_stored(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    fn sign_out_locked(&self) {
        self.set_loading(true);
        self.discard_stored();
        self.api.clear_auth_header();
        self.publish(Session::unauthenticated());
        info!("Signed out");
    }

    async fn refresh_locked(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::NotAuthenticated)?;

        self.set_loading(true);
        let result = async {
            let refreshed = self.api.refresh_session(refresh_token).await?;
            self.store.save_credentials(&refreshed)?;
            self.api.set_auth_header(&refreshed.token);
            Ok::<_, SessionError>(())
        }
        .await;
        self.set_loading(false);

        match &result {
            Ok(()) => info!("Access token refreshed"),
            Err(e) => warn!(error = %e, "Token refresh failed"),
        }
        result
    }

    /// Forced sign-out, or a refresh when the token merely expired
    async fn handle_auth_failure(&self, event: AuthFailure) {
        let _guard = self.transition.lock().await;

        let Some(current_token) = self.api.auth_token() else {
            debug!(path = event.path(), "Auth failure after sign-out, ignoring");
            return;
        };
        if !event.is_for_token(&current_token) {
            debug!(path = event.path(), "Auth failure for a replaced token, ignoring");
            return;
        }

        if self.options.refresh_tokens && event.is_token_rejection() {
            match self.store.credentials() {
                Ok(Some(credentials)) if credentials.can_refresh() => {
                    if self.refresh_locked(&credentials).await.is_ok() {
                        return;
                    }
                }
                Ok(_) => debug!("No refresh token stored"),
                Err(e) => warn!(error = %e, "Failed to read stored token pair"),
            }
        }

        warn!(path = event.path(), message = ?event.message(), "Session rejected by server, signing out");
        self.sign_out_locked();
    }
}
