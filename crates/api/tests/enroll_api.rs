//! REST surface tests driven through the router without live backends.
//!
//! The pool, cache and queue clients are constructed lazily so no Postgres,
//! Redis or queue broker is needed; these tests cover the routing table and
//! the validation paths that reject a request before any backend I/O.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use enroll_api::app::{create_app, AppState, QueueUrls};
use enroll_api::auth::{KeyStore, TokenManager, HEADER_TOKEN_TYPE};
use enroll_api::clients::DstsClient;
use enroll_api::config::Config;

async fn test_state() -> AppState {
    // Keep the AWS credential chain away from the instance metadata service.
    std::env::set_var("AWS_REGION", "us-east-1");
    std::env::set_var("AWS_ACCESS_KEY_ID", "test");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test");
    std::env::set_var("AWS_EC2_METADATA_DISABLED", "true");

    let toml = r#"
        [server]
        host = "127.0.0.1"
        port = 7979

        [logging]
        level = "info"
        format = "json"

        [database]
        server = "127.0.0.1"
        port = 5432
        user = "es"
        name = "es"

        [enrollment]
        management_services = ["HPConnect"]

        [cache]
        enabled = false

        [queue]
        pending_enroll_name = "pending_enroll"
        enroll_name = "enrolled"
        enroll_error_name = "enroll_error"

        [dsts]
        host = "127.0.0.1"
        port = 7001

        [token_types.azuread]
        type = "azuread"
        issuer = "https://login.example.com/"

        [token_types.device]
        type = "device"
        issuer = "https://dsts.example.com"
    "#;
    let config: Config = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://es:es@127.0.0.1:5432/es")
        .unwrap();
    let cache = persistence::cache::CacheClient::connect(&config.cache_config())
        .await
        .unwrap();
    let queue = shared::queue::QueueClient::connect(Some("http://127.0.0.1:1")).await;

    let token_manager = Arc::new(TokenManager::new(
        config.token_types.clone(),
        Arc::new(KeyStore::in_memory()),
        Arc::new(DstsClient::new("127.0.0.1", 7001).unwrap()),
    ));

    AppState {
        config: Arc::new(config),
        enrolls: persistence::repositories::EnrollRepository::new(pool.clone(), cache.clone()),
        unenrolls: persistence::repositories::UnenrollRepository::new(pool, cache.clone()),
        cache,
        queue,
        queue_urls: Arc::new(QueueUrls {
            pending_enroll: "http://127.0.0.1:1/queue/pending_enroll".to_string(),
            enrolled: "http://127.0.0.1:1/queue/enrolled".to_string(),
            enroll_error: "http://127.0.0.1:1/queue/enroll_error".to_string(),
        }),
        token_manager,
    }
}

fn enroll_body() -> Body {
    Body::from(r#"{"csr":"ZHVtbXk=","mgmt_service":"HPConnect"}"#)
}

#[tokio::test]
async fn test_health_is_public() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_enroll_with_get_method_fails_with_405() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(Request::get("/api/v1/enroll").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let allow = response
        .headers()
        .get(header::ALLOW)
        .expect("405 must carry an Allow header")
        .to_str()
        .unwrap();
    assert!(allow.contains("POST"), "Allow header was {allow}");
}

#[tokio::test]
async fn test_enroll_by_id_allows_get_patch_delete() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::post(format!("/api/v1/enroll/{}", uuid::Uuid::new_v4()))
                .header(header::CONTENT_TYPE, "application/json")
                .body(enroll_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let allow = response
        .headers()
        .get(header::ALLOW)
        .expect("405 must carry an Allow header")
        .to_str()
        .unwrap();
    for method in ["GET", "PATCH", "DELETE"] {
        assert!(allow.contains(method), "Allow header was {allow}");
    }
}

#[tokio::test]
async fn test_enroll_without_token_type_header_fails_with_400() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::post("/api/v1/enroll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer some-token")
                .body(enroll_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_enroll_with_unsupported_token_type_fails_with_401() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::post("/api/v1/enroll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(HEADER_TOKEN_TYPE, "invalid_token_type")
                .header(header::AUTHORIZATION, "Bearer some-token")
                .body(enroll_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enroll_without_bearer_fails_with_401() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::post("/api/v1/enroll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(HEADER_TOKEN_TYPE, "azuread")
                .body(enroll_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enroll_with_garbage_token_fails_with_401() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::post("/api/v1/enroll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(HEADER_TOKEN_TYPE, "azuread")
                .header(header::AUTHORIZATION, "Bearer not.a.jwt")
                .body(enroll_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status_with_malformed_id_fails_with_400() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::get("/api/v1/enroll/not-a-uuid")
                .header(HEADER_TOKEN_TYPE, "azuread")
                .header(header::AUTHORIZATION, "Bearer some-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_error_body_shape() {
    let app = create_app(test_state().await);
    let response = app
        .oneshot(
            Request::post("/api/v1/enroll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer some-token")
                .body(enroll_body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 400);
    assert!(body["error"].as_str().unwrap().contains("X-HP-Token-Type"));
}
