use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use multibpo_auth::JwtValidator;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Require a valid bearer token.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())?
        .ok_or_else(|| unauthorized("missing bearer token"))?;

    let principal = authenticate(&state, token)?;
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Attach the principal when a bearer token is present.
///
/// No header means anonymous; a header with a bad token is still rejected.
pub async fn optional_auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    if let Some(token) = extract_bearer(req.headers())? {
        let principal = authenticate(&state, token)?;
        req.extensions_mut().insert(principal);
    }

    Ok(next.run(req).await)
}

fn authenticate(state: &AuthState, token: &str) -> Result<PrincipalContext, Response> {
    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "bearer token rejected");
        unauthorized("invalid or expired token")
    })?;
    Ok(PrincipalContext::from_claims(&claims))
}

fn unauthorized(message: &'static str) -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, Response> {
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };

    let header = header
        .to_str()
        .map_err(|_| unauthorized("malformed authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("expected a Bearer token"))?
        .trim();

    if token.is_empty() {
        return Err(unauthorized("empty bearer token"));
    }

    Ok(Some(token))
}
