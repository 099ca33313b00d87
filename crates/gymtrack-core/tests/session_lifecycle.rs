//! End-to-end session lifecycle against a stub API and an on-disk store.

use std::time::Duration;

use gymtrack_core::auth::CredentialStore;
use gymtrack_core::{ApiClient, SessionManager, SessionOptions, SessionStatus};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager(server: &MockServer, dir: &std::path::Path) -> SessionManager {
    let api = ApiClient::new(&server.uri()).expect("client builds");
    SessionManager::new(api, CredentialStore::file(dir), SessionOptions::default())
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": 1, "name": "Ana", "email": "a@b.com", "avatar": "ana.png"},
            "token": "t1",
            "refresh_token": "r1"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_restart_restores_signed_in_session() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    let dir = tempfile::tempdir().expect("temp dir");

    let first = manager(&server, dir.path());
    assert_eq!(first.restore().await.status, SessionStatus::Unauthenticated);
    let user = first.sign_in("a@b.com", "secret1").await.expect("sign-in succeeds");
    drop(first);

    // Simulated process restart
    let second = manager(&server, dir.path());
    let session = second.restore().await;
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(session.user, Some(user));
    assert_eq!(second.api().auth_token().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_sign_out_survives_restart() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    let dir = tempfile::tempdir().expect("temp dir");

    let first = manager(&server, dir.path());
    first.restore().await;
    first.sign_in("a@b.com", "secret1").await.expect("sign-in succeeds");
    first.sign_out().await.expect("sign-out succeeds");
    drop(first);

    let second = manager(&server, dir.path());
    assert_eq!(second.restore().await.status, SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn test_exercises_listed_with_bearer_token() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["costas", "ombro"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exercises/bygroup/costas"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 1, "name": "Puxada frontal", "series": 3, "repetitions": "12",
            "group": "costas", "demo": "puxada_frontal.gif", "thumb": "puxada_frontal.png"
        }])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let manager = manager(&server, dir.path());
    manager.restore().await;
    manager.sign_in("a@b.com", "secret1").await.expect("sign-in succeeds");

    let groups = manager.api().fetch_groups().await.expect("groups listed");
    assert_eq!(groups, vec!["costas".to_string(), "ombro".to_string()]);

    let exercises = manager
        .api()
        .fetch_exercises_by_group("costas")
        .await
        .expect("exercises listed");
    assert_eq!(exercises.len(), 1);
    assert_eq!(exercises[0].display_summary(), "3 sets x 12 reps");
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["perna"])))
        .mount(&server)
        .await;

    let api = ApiClient::new(&server.uri())
        .expect("client builds")
        .with_rate_limit_policy(3, Duration::from_millis(10));
    let groups = api.fetch_groups().await.expect("retried until success");
    assert_eq!(groups, vec!["perna".to_string()]);
}

#[tokio::test]
async fn test_rate_limit_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let api = ApiClient::new(&server.uri())
        .expect("client builds")
        .with_rate_limit_policy(2, Duration::from_millis(5));
    let err = api.fetch_groups().await.expect_err("gives up");
    assert!(matches!(err, gymtrack_core::ApiError::RateLimited));
}
