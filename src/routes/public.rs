use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Unauthenticated endpoints. Material reads go through the visibility rule,
/// so an anonymous caller only ever sees approved materials.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(|| async { "ok" }))
        // GET /api-docs/openapi.json
        .route("/api-docs/openapi.json", get(handlers::openapi_json))
        // POST /auth/login
        // Throttled per client address (20/hour) and per account (5/15min).
        .route("/auth/login", post(handlers::login))
        // POST /auth/register
        // Self-service student accounts.
        .route("/auth/register", post(handlers::register))
        // POST /auth/refresh
        // Single-use rotation of a refresh token.
        .route("/auth/refresh", post(handlers::refresh))
        // GET /materials/{id}
        // Optional bearer token widens visibility to own and (for admins) all materials.
        .route("/materials/{id}", get(handlers::get_material))
}
