use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
    PaginationParams,
};
use crate::{
    auth::AuthUser,
    errors::{ApiError, ServiceError},
    services::coupons::{
        evaluator::{CartLine, Evaluation, MAX_CART_LINES},
        CouponDetails, CouponPage, CouponValidation, CreateCouponInput, RedeemCouponInput,
        UpdateCouponInput, UsageStatistic,
    },
    entities::commerce::CouponRedemptionModel,
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Optional guest cart to check a code against
#[derive(Debug, Deserialize, IntoParams)]
pub struct ValidateCouponQuery {
    pub session_id: Option<String>,
}

/// Evaluate a code against explicit items or a stored guest cart
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct EvaluateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    /// Cart lines; takes precedence over `session_id`
    pub items: Option<Vec<CartLine>>,
    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,
    /// Enables the first-order rule
    pub customer_id: Option<Uuid>,
}

async fn cart_items(state: &AppState, session_id: &str) -> Result<Vec<CartLine>, ApiError> {
    Ok(state
        .services
        .carts
        .get(session_id)
        .await
        .map_err(map_service_error)?
        .map(|cart| cart.items)
        .unwrap_or_default())
}

fn validate_items(items: &[CartLine]) -> Result<(), ApiError> {
    if items.len() > MAX_CART_LINES {
        return Err(ApiError::ValidationError(format!(
            "A cart holds at most {} lines",
            MAX_CART_LINES
        )));
    }
    items.iter().try_for_each(validate_input)
}

/// Validate a coupon code
#[utoipa::path(
    get,
    path = "/api/v1/coupons/validate/{code}",
    summary = "Validate coupon code",
    description = "Checks that a code exists, has not expired and is below its usage limit. With `session_id` the stored guest cart is evaluated as well.",
    params(
        ("code" = String, Path, description = "Coupon code (case-insensitive)"),
        ValidateCouponQuery
    ),
    responses(
        (status = 200, description = "Coupon is valid", body = ApiResponse<CouponValidation>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Coupon rejected; `details` carries the reason code", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ValidateCouponQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let items = match query.session_id.as_deref() {
        Some(session_id) => Some(cart_items(&state, session_id).await?),
        None => None,
    };

    let validation = state
        .services
        .coupons
        .validate_code(&code, items.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(validation))
}

/// Evaluate a coupon against a cart
#[utoipa::path(
    post,
    path = "/api/v1/coupons/evaluate",
    summary = "Evaluate coupon",
    description = "Computes the discount a code grants on a cart. Rejections are reported as `valid: false` with a reason.",
    request_body = EvaluateCouponRequest,
    responses(
        (status = 200, description = "Evaluation result", body = ApiResponse<Evaluation>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn evaluate_coupon(
    State(state): State<AppState>,
    Json(payload): Json<EvaluateCouponRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let items = match (payload.items, payload.session_id.as_deref()) {
        (Some(items), _) => items,
        (None, Some(session_id)) => cart_items(&state, session_id).await?,
        (None, None) => {
            return Err(ApiError::BadRequest {
                message: "Either items or session_id is required".to_string(),
                error_code: Some("missing_cart".to_string()),
            })
        }
    };
    validate_items(&items)?;

    let evaluation = state
        .services
        .coupons
        .evaluate_code(&payload.code, &items, payload.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(evaluation))
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    summary = "Create coupon",
    request_body = CreateCouponInput,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponDetails>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let coupon = state
        .services
        .coupons
        .create_coupon(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(coupon))
}

/// List coupons
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    summary = "List coupons",
    description = "Paginated list of coupons, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Coupons retrieved", body = ApiResponse<CouponPage>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .coupons
        .list_coupons(params.page, params.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(page))
}

/// Get a coupon by id
#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}",
    summary = "Get coupon",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Coupon retrieved", body = ApiResponse<CouponDetails>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .get_coupon(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupon))
}

/// Update a coupon
#[utoipa::path(
    put,
    path = "/api/v1/coupons/{id}",
    summary = "Update coupon",
    description = "Partial update. Scope lists, when present, replace the stored ones.",
    params(("id" = Uuid, Path, description = "Coupon id")),
    request_body = UpdateCouponInput,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<CouponDetails>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let coupon = state
        .services
        .coupons
        .update_coupon(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupon))
}

/// Delete a coupon
#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{id}",
    summary = "Delete coupon",
    description = "Deletes the coupon and its scope. Redemption history is kept for statistics.",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .coupons
        .delete_coupon(id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Redemptions per day across all coupons
#[utoipa::path(
    get,
    path = "/api/v1/coupons/usage-statistics",
    summary = "Coupon usage statistics",
    responses(
        (status = 200, description = "Redemptions per UTC day, ascending", body = ApiResponse<Vec<UsageStatistic>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn usage_statistics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .services
        .coupons
        .usage_statistics()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(stats))
}

/// Redemptions per day for one coupon
#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}/usage-statistics",
    summary = "Usage statistics for a coupon",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Redemptions per UTC day, ascending; empty for an unknown coupon", body = ApiResponse<Vec<UsageStatistic>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn coupon_usage_statistics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .services
        .coupons
        .usage_statistics_for(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(stats))
}

/// Record a redemption at order commit
#[utoipa::path(
    post,
    path = "/api/v1/coupons/redemptions",
    summary = "Redeem coupon",
    description = "Called by order placement when an order is committed. Increments the usage counter atomically.",
    request_body = RedeemCouponInput,
    responses(
        (status = 201, description = "Redemption recorded", body = ApiResponse<CouponRedemptionModel>),
        (status = 400, description = "Coupon rejected; `details` carries the reason code", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already redeemed a coupon", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn redeem_coupon(
    State(state): State<AppState>,
    Json(payload): Json<RedeemCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let redemption = state
        .services
        .coupons
        .redeem(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(redemption))
}

/// Active coupons owned by the caller
#[utoipa::path(
    get,
    path = "/api/v1/coupons/mine",
    summary = "My coupons",
    responses(
        (status = 200, description = "Unexpired coupons below their usage limit", body = ApiResponse<Vec<CouponDetails>>),
        (status = 400, description = "Token subject is not a user id", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn my_coupons(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user_uuid().ok_or_else(|| {
        map_service_error(ServiceError::InvalidInput(
            "token subject is not a user id".to_string(),
        ))
    })?;

    let coupons = state
        .services
        .coupons
        .active_coupons_for_user(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupons))
}
