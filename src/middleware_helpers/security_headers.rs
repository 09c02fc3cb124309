use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

const API_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    ("x-permitted-cross-domain-policies", "none"),
    ("server", "storefront-api"),
];

const API_CSP: &str =
    "default-src 'none'; frame-ancestors 'none'; form-action 'none'; base-uri 'none'";

/// Hardening headers for JSON responses. The Swagger UI pages keep their own
/// content policy and may be cached.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let serves_docs = req.uri().path().starts_with("/swagger-ui");
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    for (name, value) in API_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    if !serves_docs {
        headers.insert(
            HeaderName::from_static("content-security-policy"),
            HeaderValue::from_static(API_CSP),
        );
        // Coupon and cart answers change with every redemption
        if !headers.contains_key("cache-control") {
            headers.insert(
                HeaderName::from_static("cache-control"),
                HeaderValue::from_static("no-store"),
            );
        }
    }

    res
}
