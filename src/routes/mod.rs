/// Router Module Index
///
/// Routes are split by who may call them, so access control is applied per
/// module rather than remembered per handler.

/// Anonymous callers: health, docs, login, refresh, approved materials.
pub mod public;

/// Requires a valid access token (enforced by `AuthUser`).
pub mod authenticated;

/// Admin role only; the role is checked inside each handler.
pub mod admin;
