//! Control-plane scenarios from the spec: two concurrent backup triggers
//! single-flight to 202/409, and bearer-token auth gates every route once a
//! token is configured.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use baxter_core::config::Config;
use baxter_core::paths::StatePaths;
use baxter_service::{http, Supervisor};
use tower::ServiceExt;

fn supervisor(state_dir: &std::path::Path, tokens: Vec<String>) -> Arc<Supervisor> {
    let paths = StatePaths::with_root(state_dir.join("state"));
    paths.ensure_dirs().unwrap();
    let mut config = Config {
        backup_roots: vec![state_dir.join("src").to_string_lossy().into_owned()],
        ..Config::default()
    };
    config.server.tokens = tokens;
    Supervisor::new(paths, config, state_dir.join("config.toml"), "test-passphrase".to_string())
}

async fn get(router: axum::Router, path: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header("X-Baxter-Token", token);
    }
    let response = router.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn post(router: axum::Router, path: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(token) = token {
        builder = builder.header("X-Baxter-Token", token);
    }
    let response = router
        .oneshot(builder.body(Body::from("{}")).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn second_concurrent_backup_trigger_is_rejected_with_409() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(dir.path().join("src")).await.unwrap();
    tokio::fs::write(dir.path().join("src/a.txt"), b"x").await.unwrap();
    let sup = supervisor(dir.path(), vec![]);
    let router = http::router(sup.clone());

    let (first_status, _) = post(router.clone(), "/v1/backup/run", None).await;
    let (second_status, second_body) = post(router.clone(), "/v1/backup/run", None).await;

    assert_eq!(first_status, StatusCode::ACCEPTED);
    assert_eq!(second_status, StatusCode::CONFLICT);
    assert_eq!(second_body["code"], "backup_running");

    for _ in 0..50 {
        if !sup.is_backup_running() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let (status_code, status_body) = get(router, "/v1/status", None).await;
    assert_eq!(status_code, StatusCode::OK);
    assert!(status_body["state"] == "idle" || status_body["state"] == "failed");
}

#[tokio::test]
async fn write_endpoint_requires_token_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), vec!["secret-token".to_string()]);
    let router = http::router(sup);

    let (no_token_status, no_token_body) = post(router.clone(), "/v1/backup/run", None).await;
    assert_eq!(no_token_status, StatusCode::UNAUTHORIZED);
    assert_eq!(no_token_body["code"], "unauthorized");

    let (with_token_status, _) = post(router.clone(), "/v1/backup/run", Some("secret-token")).await;
    assert_eq!(with_token_status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn a_second_configured_token_is_also_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), vec!["first".to_string(), "second".to_string()]);
    let router = http::router(sup);

    let (status, _) = get(router.clone(), "/v1/status", Some("second")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(router, "/v1/status", Some("third")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn read_endpoints_are_open_when_no_token_is_configured() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), vec![]);
    let router = http::router(sup);

    let (status, _) = get(router, "/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
}
