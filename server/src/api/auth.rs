use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::{ApiErr, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Extractor: requires the configured API key in the `x-api-key` header.
///
/// The key itself is owned by the deployment (who issues it, how it
/// rotates); this boundary only compares header to config.
pub struct ApiKey;

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiErr;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiErr::unauthorized("Missing API key"))?;

        if !constant_time_eq(provided.as_bytes(), state.api_key.as_bytes()) {
            return Err(ApiErr::unauthorized("Invalid API key"));
        }

        Ok(ApiKey)
    }
}

/// Constant-time comparison for equal-length inputs.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
