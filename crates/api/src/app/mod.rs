//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and service construction
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use multibpo_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from configuration (entrypoint used by `main.rs`).
pub async fn build_app(config: AppConfig) -> Result<Router, services::ServicesError> {
    let services = services::build_services(&config).await?;
    Ok(build_router(services))
}

/// Build the router around already-wired services.
pub fn build_router(services: services::AppServices) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.tokens.clone(),
    };

    // Assistant routes: anonymous or authenticated.
    let assistant = routes::assistant::router().layer(axum::middleware::from_fn_with_state(
        auth_state.clone(),
        middleware::optional_auth_middleware,
    ));

    // Account routes: bearer token required.
    let protected = routes::account::protected_router().layer(
        axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::account::public_router())
        .merge(assistant)
        .merge(protected)
        .layer(Extension(Arc::new(services)))
        .layer(ServiceBuilder::new())
}
