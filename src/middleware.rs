use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::middleware::Next;
use axum::body::Body;

use crate::config::Config;

/// header carrying the admin api key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// sha256 of the admin api key, installed as a request extension
#[derive(Clone, Debug)]
pub struct ApiKeyHash(pub String);

// guards the /__droppr endpoints, proxied traffic never passes through here
pub async fn validate_api_key(
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = req
        .extensions()
        .get::<ApiKeyHash>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header on {}", API_KEY_HEADER, req.uri().path());
            StatusCode::UNAUTHORIZED
        })?;

    if Config::hash_api_key(provided) != expected.0 {
        tracing::warn!("🚫 Invalid API key for {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}
