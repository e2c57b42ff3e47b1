use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use persistence::cache::CacheClient;
use persistence::repositories::{EnrollRepository, UnenrollRepository};
use shared::queue::QueueClient;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::TokenManager;
use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::routes::{enroll, health, maintenance, status, unenroll};

/// Resolved queue urls, looked up once at startup.
#[derive(Debug, Clone)]
pub struct QueueUrls {
    pub pending_enroll: String,
    pub enrolled: String,
    pub enroll_error: String,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub enrolls: EnrollRepository,
    pub unenrolls: UnenrollRepository,
    pub cache: CacheClient,
    pub queue: QueueClient,
    pub queue_urls: Arc<QueueUrls>,
    pub token_manager: Arc<TokenManager>,
}

pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics_handler))
        // Device facing enroll surface. The method router answers requests
        // with a wrong method with 405 plus an Allow header listing the
        // registered methods.
        .route("/api/v1/enroll", post(enroll::enroll_device))
        .route(
            "/api/v1/enroll/:id",
            get(status::enroll_status)
                .patch(enroll::renew_enroll)
                .delete(unenroll::unenroll_device),
        )
        // Maintenance trigger equivalent to one reaper tick.
        .route(
            "/api/v1/internal/enroll/expired",
            delete(maintenance::delete_expired_enrolls),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
