//! API client for communicating with the gym REST API.
//!
//! This module provides the `ApiClient` struct for creating sessions and
//! making authenticated requests for profile and exercise data.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{header, Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Credentials, Exercise, ProfileUpdate, User};

use super::observer::{self, AuthFailure, AuthFailureRegistry, AuthFailureSubscription};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Body of a successful `POST /sessions`.
///
/// Every field is optional on the wire; `into_parts` decides whether the
/// response is usable.
#[derive(Deserialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl SessionResponse {
    /// Split into the user and token pair, or `None` if either is missing
    pub fn into_parts(self) -> Option<(User, Credentials)> {
        let user = self.user.filter(User::has_identity)?;
        let token = self.token.filter(|t| !t.is_empty())?;
        Some((user, Credentials::new(token, self.refresh_token)))
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Configuration shared by every clone of a client.
#[derive(Default)]
struct AuthState {
    token: RwLock<Option<String>>,
    /// Last token we reported as rejected, so a burst of 401s for the same
    /// token produces one event.
    last_rejected: Mutex<Option<String>>,
    failures: Arc<AuthFailureRegistry>,
}

/// API client for the gym API.
/// Clone is cheap and clones share the connection pool and the auth header.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    auth: Arc<AuthState>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client for the given base URL
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            auth: Arc::new(AuthState::default()),
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override how rate-limited requests are retried
    pub fn with_rate_limit_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ===== Auth header =====

    /// Set the bearer token used on every subsequent request from this
    /// client and all of its clones
    pub fn set_auth_header(&self, token: &str) {
        *self.auth.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        *self
            .auth
            .last_rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Auth header configured");
    }

    pub fn clear_auth_header(&self) {
        *self.auth.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Auth header cleared");
    }

    /// The token currently attached to requests
    pub fn auth_token(&self) -> Option<String> {
        self.auth
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_auth_header(&self) -> bool {
        self.auth
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribe to "the server rejected our token" events.
    ///
    /// The handler runs on a spawned task, at most once per rejected token.
    pub fn on_auth_failure<F, Fut>(&self, handler: F) -> AuthFailureSubscription
    where
        F: Fn(AuthFailure) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.auth.failures.subscribe(observer::handler(handler))
    }

    /// Number of live auth failure subscriptions
    pub fn auth_failure_subscribers(&self) -> usize {
        self.auth.failures.len()
    }

    // ===== Transport =====

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self, token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidResponse("Token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Report a 401 for a request that carried `token`, once per token
    fn report_rejected(&self, token: &str, message: Option<String>, path: &str) {
        {
            let mut last = self
                .auth
                .last_rejected
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(token) {
                debug!(path, "Token already reported as rejected");
                return;
            }
            *last = Some(token.to_string());
        }
        warn!(path, message = ?message, "Server rejected the access token");
        self.auth
            .failures
            .notify(AuthFailure::new(token.to_string(), message, path.to_string()));
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        &self,
        response: Response,
        token: Option<&str>,
        path: &str,
    ) -> Result<Option<Response>, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if status.as_u16() == 429 {
            return Ok(None);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_status(status, &body);
        if let (ApiError::Unauthorized { message }, Some(token)) = (&err, token) {
            self.report_rejected(token, message.clone(), path);
        }
        Err(err)
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    /// `authenticated` requests carry the configured bearer token.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        authenticated: bool,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let token = if authenticated { self.auth_token() } else { None };
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers(token.as_deref())?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            match self.check_response_for_retry(response, token.as_deref(), path).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > self.max_retries {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    /// Perform an authenticated request and decode the JSON response
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send(method, path, body, true).await?;
        Self::parse(response, path).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    // ===== Sessions =====

    /// Exchange email and password for a user and token pair.
    /// Sent without the bearer header so a stale token is never reported.
    pub async fn create_session(&self, email: &str, password: &str) -> Result<SessionResponse, ApiError> {
        let body = SessionRequest { email, password };
        let response = self.send(Method::POST, "/sessions", Some(&body), false).await?;
        Self::parse(response, "/sessions").await
    }

    /// Mint a new token pair from a refresh token
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Credentials, ApiError> {
        let body = RefreshRequest { refresh_token };
        let path = "/sessions/refresh-token";
        let response = self.send(Method::POST, path, Some(&body), false).await?;
        let refreshed: RefreshResponse = Self::parse(response, path).await?;
        Ok(Credentials::new(
            refreshed.token,
            refreshed.refresh_token.or_else(|| Some(refresh_token.to_string())),
        ))
    }

    // ===== Profile =====

    /// Update name and optionally password. The API answers with an empty body.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        self.send(Method::PUT, "/users", Some(update), true).await?;
        Ok(())
    }

    // ===== Exercises =====

    /// Fetch the muscle groups that have exercises
    pub async fn fetch_groups(&self) -> Result<Vec<String>, ApiError> {
        self.get("/groups").await
    }

    /// Fetch every exercise for one muscle group
    pub async fn fetch_exercises_by_group(&self, group: &str) -> Result<Vec<Exercise>, ApiError> {
        self.get(&exercises_by_group_path(group)).await
    }

    /// Fetch a single exercise
    pub async fn fetch_exercise(&self, id: i64) -> Result<Exercise, ApiError> {
        self.get(&format!("/exercises/{}", id)).await
    }
}

/// Path of the exercise listing for one muscle group
fn exercises_by_group_path(group: &str) -> String {
    format!("/exercises/bygroup/{}", urlencoding::encode(group))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_is_encoded_as_one_segment() {
        assert_eq!(exercises_by_group_path("costas"), "/exercises/bygroup/costas");
        assert_eq!(
            exercises_by_group_path("ombro e braço"),
            "/exercises/bygroup/ombro%20e%20bra%C3%A7o"
        );
        assert_eq!(exercises_by_group_path("a/b"), "/exercises/bygroup/a%2Fb");
    }

    #[test]
    fn test_url_joins_cleanly() {
        let client = ApiClient::new("http://localhost:3333/").expect("client builds");
        assert_eq!(client.base_url(), "http://localhost:3333");
        assert_eq!(client.url("/sessions"), "http://localhost:3333/sessions");
        assert_eq!(client.url("groups"), "http://localhost:3333/groups");
    }

    #[test]
    fn test_session_response_requires_user_and_token() {
        let full: SessionResponse = serde_json::from_str(
            r#"{"user": {"id": 1, "name": "Ana", "email": "a@b.com", "avatar": null}, "token": "t1", "refresh_token": "r1"}"#,
        )
        .expect("valid session json");
        let (user, creds) = full.into_parts().expect("complete response");
        assert_eq!(user.id, 1);
        assert_eq!(creds.token, "t1");
        assert_eq!(creds.refresh_token.as_deref(), Some("r1"));

        let no_token: SessionResponse =
            serde_json::from_str(r#"{"user": {"id": 1, "name": "Ana", "email": "a@b.com"}}"#)
                .expect("valid session json");
        assert!(no_token.into_parts().is_none());

        let empty_user: SessionResponse =
            serde_json::from_str(r#"{"user": {"id": 0, "name": "", "email": ""}, "token": "t1"}"#)
                .expect("valid session json");
        assert!(empty_user.into_parts().is_none());
    }

    #[test]
    fn test_auth_header_is_shared_between_clones() {
        let client = ApiClient::new("http://localhost:3333").expect("client builds");
        let clone = client.clone();
        assert!(!clone.has_auth_header());

        client.set_auth_header("t1");
        assert_eq!(clone.auth_token().as_deref(), Some("t1"));

        clone.clear_auth_header();
        assert!(!client.has_auth_header());
    }
}
