//! Subscriptions to "the server rejected our token" events.
//!
//! The transport knows nothing about sessions. It only reports that a request
//! carrying a bearer token came back 401, and every subscribed handler decides
//! what to do about it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{debug, trace};

/// Server messages that mean the token itself is stale rather than the
/// account being refused.
const TOKEN_REJECTION_MESSAGES: [&str; 2] = ["token.expired", "token.invalid"];

/// A 401 received for a request that carried a bearer token.
#[derive(Clone)]
pub struct AuthFailure {
    rejected_token: String,
    message: Option<String>,
    path: String,
}

impl AuthFailure {
    pub(crate) fn new(rejected_token: String, message: Option<String>, path: String) -> Self {
        Self {
            rejected_token,
            message,
            path,
        }
    }

    /// Whether this event is about the given access token
    pub fn is_for_token(&self, token: &str) -> bool {
        self.rejected_token == token
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the server says the token expired or is malformed, which a
    /// refresh can fix. Any other 401 means the account itself was refused.
    pub fn is_token_rejection(&self) -> bool {
        match self.message.as_deref() {
            None => true,
            Some(m) => TOKEN_REJECTION_MESSAGES.contains(&m),
        }
    }
}

impl fmt::Debug for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFailure")
            .field("message", &self.message)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A subscribed callback. Handlers return a future so they can await the
/// work they start; each one runs independently of the others.
pub type AuthFailureHandler = Arc<dyn Fn(AuthFailure) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an `AuthFailureHandler`
pub fn handler<F, Fut>(f: F) -> AuthFailureHandler
where
    F: Fn(AuthFailure) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

#[derive(Default)]
pub(crate) struct AuthFailureRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, AuthFailureHandler>>,
}

impl AuthFailureRegistry {
    pub(crate) fn subscribe(self: &Arc<Self>, handler: AuthFailureHandler) -> AuthFailureSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handler);
        debug!(id, "Auth failure handler subscribed");

        AuthFailureSubscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every handler on a background task so the failing caller never
    /// waits on (or re-enters) the session logic.
    pub(crate) fn notify(&self, event: AuthFailure) {
        let handlers: Vec<AuthFailureHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        if handlers.is_empty() {
            trace!(path = %event.path, "Auth failure with no subscribers");
            return;
        }

        debug!(path = %event.path, handlers = handlers.len(), "Dispatching auth failure");
        tokio::spawn(async move {
            join_all(handlers.iter().map(|h| h(event.clone()))).await;
        });
    }
}

/// Disposer returned by `ApiClient::on_auth_failure`.
///
/// `unsubscribe` removes exactly this handler and may be called any number of
/// times. Dropping the subscription unsubscribes as well.
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct AuthFailureSubscription {
    id: u64,
    registry: Weak<AuthFailureRegistry>,
}

impl AuthFailureSubscription {
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!(id = self.id, "Auth failure handler unsubscribed");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry.upgrade().is_some_and(|r| {
            r.handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&self.id)
        })
    }
}

impl Drop for AuthFailureSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for AuthFailureSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFailureSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
