use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, post},
};

/// Admin Router Module
///
/// Moderation endpoints, nested under `/admin`. Handlers reject non-admin
/// callers with 403 after the `AuthUser` extractor has authenticated them.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /admin/materials/{id}/review
        // Approve or reject a pending material (rejection needs a reason).
        .route("/materials/{id}/review", post(handlers::review_material))
        // DELETE /admin/materials/{id}
        // Administrative removal from any state.
        .route("/materials/{id}", delete(handlers::delete_material))
}
