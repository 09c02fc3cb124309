#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use storefront_api::{
    auth::Claims,
    config::AppConfig,
    db::{self, DbConfig},
    events::{self, EventSender},
    services::clock::{Clock, FixedClock},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "storefront_signing_key_for_integration_tests_7Hq2Vn9Lp4Xc8Rz1Tb6Wd3Ky5Mf0Ja_s";

/// Instant every test application starts at.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Helper harness for spinning up the full router backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        let pool = db::establish_connection_with_config(&DbConfig::sqlite_in_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let clock = Arc::new(FixedClock::new(test_now()));
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let state = AppState::new(Arc::new(pool), cfg, event_sender, shared_clock);
        let router = storefront_api::build_router(state.clone());

        let admin_token = mint_token(&state.config, &Uuid::new_v4().to_string(), &["admin"], &[]);

        Self {
            router,
            state,
            clock,
            admin_token,
            _event_task: event_task,
        }
    }

    /// Bearer token carrying the `admin` role.
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Token for `subject` with explicit roles and permissions.
    pub fn token_for(&self, subject: &str, roles: &[&str], permissions: &[&str]) -> String {
        mint_token(&self.state.config, subject, roles, permissions)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests made as the admin user.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.admin_token())).await
    }

    /// Creates a coupon through the admin API and returns the `data` payload.
    pub async fn create_coupon(&self, body: Value) -> Value {
        let response = self
            .request_authenticated(Method::POST, "/api/v1/coupons", Some(body))
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        response_json(response).await["data"].clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Sign a token the way the identity provider would.
pub fn mint_token(cfg: &AppConfig, subject: &str, roles: &[&str], permissions: &[&str]) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        name: Some("Test User".to_string()),
        email: Some("test@example.com".to_string()),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        tenant_id: None,
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::hours(1)).timestamp(),
        nbf: now.timestamp(),
        iss: cfg.auth_issuer.clone(),
        aud: cfg.auth_audience.clone(),
        scope: None,
    };

    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
    )
    .expect("encode access token")
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Parses a decimal that may be serialized as a string or a number.
pub fn decimal(value: &Value) -> rust_decimal::Decimal {
    use std::str::FromStr;
    match value {
        Value::String(s) => rust_decimal::Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => rust_decimal::Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
