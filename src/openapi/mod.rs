use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Coupon API

Coupon validation and discount evaluation for the storefront checkout, plus
coupon administration and usage analytics.

## Authentication

Customer-facing endpoints (`/coupons/validate`, `/coupons/evaluate`, `/carts`)
are public. Administration endpoints require a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

## Rejections

A rejected coupon is a `400` whose `details` field carries one of
`expired`, `usage_limit_reached`, `not_applicable`, `min_purchase_not_met`,
`not_found` or `first_time_only`. `POST /coupons/evaluate` reports the same
reasons inside a `200` body with `valid: false`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "coupons", description = "Coupon validation, evaluation and administration"),
        (name = "carts", description = "Guest cart store"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::evaluate_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::delete_coupon,
        crate::handlers::coupons::usage_statistics,
        crate::handlers::coupons::coupon_usage_statistics,
        crate::handlers::coupons::redeem_coupon,
        crate::handlers::coupons::my_coupons,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::replace_cart,
        crate::handlers::carts::clear_cart,
        crate::health::health_check,
        crate::health::readiness_check,
        crate::health::version_info,
    ),
    components(
        schemas(
            crate::handlers::coupons::EvaluateCouponRequest,
            crate::handlers::carts::ReplaceCartRequest,
            crate::services::coupons::CreateCouponInput,
            crate::services::coupons::UpdateCouponInput,
            crate::services::coupons::RedeemCouponInput,
            crate::services::coupons::CouponDetails,
            crate::services::coupons::CouponValidation,
            crate::services::coupons::CouponPage,
            crate::services::coupons::UsageStatistic,
            crate::services::coupons::evaluator::CartLine,
            crate::services::coupons::evaluator::Evaluation,
            crate::services::cart_store::GuestCart,
            crate::health::HealthResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// Registers the `Bearer` scheme referenced by the admin paths.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url(OPENAPI_JSON_PATH, ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from(OPENAPI_JSON_PATH).try_it_out_enabled(true))
}
