use http::HeaderValue;
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::AppConfig;

/// Parses the comma separated origin list, skipping blanks and invalid values.
fn configured_origins(raw: Option<&str>) -> Option<Vec<HeaderValue>> {
    raw.map(|raw| {
        raw.split(',')
            .filter_map(|origin| {
                let trimmed = origin.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    HeaderValue::from_str(trimmed).ok()
                }
            })
            .collect::<Vec<_>>()
    })
    .filter(|origins| !origins.is_empty())
}

/// Builds the CORS layer from config. Without explicit origins and without the
/// permissive override, cross-origin requests are refused.
pub fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    if let Some(origins) = configured_origins(cfg.cors_allowed_origins.as_deref()) {
        let layer = CorsLayer::new().allow_origin(origins);
        // Wildcards are not allowed together with credentials
        if cfg.cors_allow_credentials {
            layer
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true)
        } else {
            layer.allow_methods(Any).allow_headers(Any)
        }
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        warn!("No CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_invalid_origins_are_skipped() {
        let origins = configured_origins(Some("https://shop.example, ,bad\norigin")).unwrap();
        assert_eq!(origins, vec![HeaderValue::from_static("https://shop.example")]);

        assert!(configured_origins(Some(" , ")).is_none());
        assert!(configured_origins(None).is_none());
    }
}
