use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Every handler here takes an `AuthUser`, and the router is additionally
/// wrapped in the auth middleware, so an invalid or revoked token never
/// reaches a handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /auth/logout
        // Blacklists the presented access token for the rest of its lifetime.
        .route("/auth/logout", post(handlers::logout))
        // POST /auth/change-password
        .route("/auth/change-password", post(handlers::change_password))
        // GET /me
        .route("/me", get(handlers::get_me))
        // POST /materials
        // Committee or admin only. New materials enter the review queue as `pending`.
        .route("/materials", post(handlers::create_material))
        // PUT /materials/{id}
        // Committee or admin only. Uploader edits send the material back to `pending`.
        .route("/materials/{id}", put(handlers::update_material))
        // GET /materials/{id}/download
        // Signed link; counts against the daily download quota.
        .route("/materials/{id}/download", get(handlers::get_download_url))
}
