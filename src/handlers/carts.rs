use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    errors::{ApiError, ServiceError},
    services::{
        cart_store::GuestCart,
        coupons::evaluator::{CartLine, MAX_CART_LINES},
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const MAX_SESSION_ID_LEN: usize = 128;

/// Creates the router for guest cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new().route(
        "/:session_id",
        get(get_cart).put(replace_cart).delete(clear_cart),
    )
}

/// Replace the contents of a guest cart
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ReplaceCartRequest {
    pub items: Vec<CartLine>,
    /// Version the client last read; a mismatch is rejected with 409
    pub expected_version: Option<u64>,
}

fn check_session_id(session_id: &str) -> Result<(), ApiError> {
    if session_id.trim().is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(ApiError::BadRequest {
            message: format!("session_id must be 1 to {} characters", MAX_SESSION_ID_LEN),
            error_code: Some("invalid_session_id".to_string()),
        });
    }
    Ok(())
}

/// Get a guest cart
#[utoipa::path(
    get,
    path = "/api/v1/carts/{session_id}",
    summary = "Get guest cart",
    params(("session_id" = String, Path, description = "Guest session id")),
    responses(
        (status = 200, description = "Cart retrieved", body = ApiResponse<GuestCart>),
        (status = 404, description = "No cart stored for the session", body = crate::errors::ErrorResponse),
    ),
    tag = "carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_session_id(&session_id)?;

    let cart = state
        .services
        .carts
        .get(&session_id)
        .await
        .map_err(map_service_error)?
        .ok_or_else(|| {
            map_service_error(ServiceError::NotFound(format!(
                "Cart for session {} not found",
                session_id
            )))
        })?;

    Ok(success_response(cart))
}

/// Replace a guest cart
#[utoipa::path(
    put,
    path = "/api/v1/carts/{session_id}",
    summary = "Replace guest cart",
    description = "Stores the given lines. With `expected_version` the write only succeeds if the stored cart is still at that version.",
    params(("session_id" = String, Path, description = "Guest session id")),
    request_body = ReplaceCartRequest,
    responses(
        (status = 200, description = "Cart stored", body = ApiResponse<GuestCart>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Stale cart version", body = crate::errors::ErrorResponse),
    ),
    tag = "carts"
)]
pub async fn replace_cart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<ReplaceCartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_session_id(&session_id)?;
    if payload.items.len() > MAX_CART_LINES {
        return Err(ApiError::ValidationError(format!(
            "A cart holds at most {} lines",
            MAX_CART_LINES
        )));
    }
    payload.items.iter().try_for_each(validate_input)?;

    let cart = state
        .services
        .carts
        .set(&session_id, payload.items, payload.expected_version)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Clear a guest cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{session_id}",
    summary = "Clear guest cart",
    params(("session_id" = String, Path, description = "Guest session id")),
    responses(
        (status = 204, description = "Cart cleared"),
    ),
    tag = "carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_session_id(&session_id)?;

    state
        .services
        .carts
        .clear(&session_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_bounded() {
        assert!(check_session_id("guest-1").is_ok());
        assert!(check_session_id("  ").is_err());
        assert!(check_session_id(&"s".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }
}
