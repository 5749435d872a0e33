use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;

/// Rejects requests without the configured bearer token. No token configured
/// means the API is open.
pub async fn auth_middleware(
    State(config): State<Arc<Config>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(api_token) = &config.monitoring.api_token {
        let presented = req.headers().typed_get::<Authorization<Bearer>>();
        let authorized = presented
            .map(|auth| auth.token() == api_token)
            .unwrap_or(false);
        if !authorized {
            debug!("Rejected unauthenticated request to {}", req.uri().path());
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    Ok(next.run(req).await)
}
