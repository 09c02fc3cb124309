//! Storefront API Library
//!
//! Coupon validation and discount evaluation for the storefront checkout,
//! coupon administration, usage analytics and the guest cart store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::auth::consts as perm;
use crate::auth::{AuthConfig, AuthRouterExt, AuthService};
use crate::services::clock::Clock;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires the services and the token validator from configuration.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            Arc::new(event_sender.clone()),
            clock,
            config.guest_cart_ttl(),
        );
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config)));

        Self {
            db,
            config,
            event_sender,
            services,
            auth,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    pub(crate) fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn success_response_outside_a_request_has_no_request_id() {
        let response = ApiResponse::success(1);
        let meta = response.meta.expect("metadata expected");
        assert!(meta.request_id.is_none());
        assert!(!meta.timestamp.is_empty());
    }
}

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    // Customer-facing, no authentication
    let storefront = Router::new()
        .route(
            "/coupons/validate/:code",
            get(handlers::coupons::validate_coupon),
        )
        .route(
            "/coupons/evaluate",
            post(handlers::coupons::evaluate_coupon),
        )
        .nest("/carts", handlers::carts::carts_routes());

    let coupons_read = Router::new()
        .route("/coupons", get(handlers::coupons::list_coupons))
        .route("/coupons/:id", get(handlers::coupons::get_coupon))
        .with_permission(perm::COUPONS_READ);

    let coupons_create = Router::new()
        .route("/coupons", post(handlers::coupons::create_coupon))
        .with_permission(perm::COUPONS_CREATE);

    let coupons_update = Router::new()
        .route(
            "/coupons/:id",
            axum::routing::put(handlers::coupons::update_coupon),
        )
        .with_permission(perm::COUPONS_UPDATE);

    let coupons_delete = Router::new()
        .route(
            "/coupons/:id",
            axum::routing::delete(handlers::coupons::delete_coupon),
        )
        .with_permission(perm::COUPONS_DELETE);

    let coupons_analytics = Router::new()
        .route(
            "/coupons/usage-statistics",
            get(handlers::coupons::usage_statistics),
        )
        .route(
            "/coupons/:id/usage-statistics",
            get(handlers::coupons::coupon_usage_statistics),
        )
        .with_permission(perm::COUPONS_ANALYTICS);

    // Order placement service
    let coupons_redeem = Router::new()
        .route(
            "/coupons/redemptions",
            post(handlers::coupons::redeem_coupon),
        )
        .with_permission(perm::COUPONS_REDEEM);

    // Any authenticated user
    let coupons_mine = Router::new()
        .route("/coupons/mine", get(handlers::coupons::my_coupons))
        .with_auth();

    Router::new()
        .merge(storefront)
        .merge(coupons_read)
        .merge(coupons_create)
        .merge(coupons_update)
        .merge(coupons_delete)
        .merge(coupons_analytics)
        .merge(coupons_redeem)
        .merge(coupons_mine)
}

/// Full application router: health, `/api/v1`, Swagger UI and the shared
/// middleware stack.
pub fn build_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();
    let cors = middleware_helpers::cors_layer(&state.config);
    let request_timeout = state.config.request_timeout();

    Router::<AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/health", health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::security_headers_middleware,
        ))
        // Auth middleware reads the service from request extensions
        .layer(Extension(auth_service))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}
