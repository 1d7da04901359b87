use crate::{
    ApiDoc, AppState,
    auth::{AuthUser, ClientIp},
    error::ApiError,
    login::LoginOutcome,
    models::{
        ChangePasswordRequest, CreateMaterialRequest, DownloadUrlResponse, LoginRequest,
        Material, RefreshRequest, RegisterRequest, ReviewMaterialRequest, UpdateMaterialRequest,
        UserProfile,
    },
    session::TokenPair,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use utoipa::OpenApi;

// --- Session ---

/// login
///
/// [Public Route] Exchanges credentials for a token pair. Throttled per client
/// address and per account before any password check.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginOutcome),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account disabled"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginOutcome>, ApiError> {
    let outcome = state
        .login
        .login(&ip, &payload.username, &payload.password)
        .await?;
    Ok(Json(outcome))
}

/// register
///
/// [Public Route] Creates an active student account. The caller logs in
/// separately.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserProfile),
        (status = 400, description = "Invalid username, email or password"),
        (status = 409, description = "Username or email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let profile = state.login.register(payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// change_password
///
/// [Authenticated Route] Replaces the caller's password after checking the
/// current one.
#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Wrong current password or weak new password")
    )
)]
pub async fn change_password(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state.login.change_password(user.id, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// refresh
///
/// [Public Route] Rotates a refresh token. The presented token is single-use.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Expired, malformed or already used"),
        (status = 403, description = "Account disabled")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state.sessions.refresh(&payload.refresh_token).await?;
    Ok(Json(pair))
}

/// logout
///
/// [Authenticated Route] Blacklists the presented access token. Idempotent.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out"))
)]
pub async fn logout(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.sessions.logout(&user.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// get_me
///
/// [Authenticated Route] Identity carried by the current access token.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Current user", body = UserProfile))
)]
pub async fn get_me(AuthUser { id, role, .. }: AuthUser) -> Json<UserProfile> {
    Json(UserProfile { id, role })
}

// --- Materials ---

/// create_material
///
/// [Committee Route] Registers an uploaded file as a material. It starts
/// in `pending` and stays invisible to the public until approved.
#[utoipa::path(
    post,
    path = "/materials",
    request_body = CreateMaterialRequest,
    responses(
        (status = 201, description = "Material submitted", body = Material),
        (status = 403, description = "Committee or admin role required")
    )
)]
pub async fn create_material(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateMaterialRequest>,
) -> Result<(StatusCode, Json<Material>), ApiError> {
    if !user.can_upload() {
        return Err(ApiError::Forbidden);
    }
    let material = state.reviews.create(&user.actor(), payload).await?;
    Ok((StatusCode::CREATED, Json(material)))
}

/// update_material
///
/// [Committee Route] Edits a material. An uploader's edit sends it back
/// to review; an admin's edit leaves the review untouched.
#[utoipa::path(
    put,
    path = "/materials/{id}",
    request_body = UpdateMaterialRequest,
    responses(
        (status = 200, description = "Updated", body = Material),
        (status = 403, description = "Not the uploader, not editable, or no committee role"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Changed concurrently")
    )
)]
pub async fn update_material(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateMaterialRequest>,
) -> Result<Json<Material>, ApiError> {
    if !user.can_upload() {
        return Err(ApiError::Forbidden);
    }
    let material = state.reviews.submit(id, &user.actor(), payload).await?;
    Ok(Json(material))
}

/// get_material
///
/// [Public Route] Approved materials are visible to everyone; anything else
/// only to its uploader or an admin.
#[utoipa::path(
    get,
    path = "/materials/{id}",
    responses(
        (status = 200, description = "Material", body = Material),
        (status = 403, description = "Not visible to the caller"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_material(
    user: Option<AuthUser>,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Material>, ApiError> {
    let viewer = user.as_ref().map(AuthUser::actor);
    let material = state.reviews.view(id, viewer.as_ref()).await?;
    Ok(Json(material))
}

/// get_download_url
///
/// [Authenticated Route] Signs a short-lived link to an approved material and
/// charges one download against the caller's daily quota.
#[utoipa::path(
    get,
    path = "/materials/{id}/download",
    responses(
        (status = 200, description = "Signed link", body = DownloadUrlResponse),
        (status = 403, description = "Material not approved"),
        (status = 404, description = "Not Found"),
        (status = 429, description = "Daily limit reached")
    )
)]
pub async fn get_download_url(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DownloadUrlResponse>, ApiError> {
    let grant = state.downloads.get_download_url(id, user.id).await?;
    Ok(Json(DownloadUrlResponse {
        remaining_today: grant.remaining_today(),
        download_url: grant.url,
    }))
}

// --- Admin ---

/// review_material
///
/// [Admin Route] Approves or rejects a pending material. Rejection requires a
/// reason; a material can only be decided once per submission.
#[utoipa::path(
    post,
    path = "/admin/materials/{id}/review",
    request_body = ReviewMaterialRequest,
    responses(
        (status = 200, description = "Decision recorded", body = Material),
        (status = 400, description = "Missing rejection reason"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn review_material(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewMaterialRequest>,
) -> Result<Json<Material>, ApiError> {
    if !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let material = state
        .reviews
        .decide(id, user.id, payload.outcome, payload.rejection_reason.as_deref())
        .await?;
    Ok(Json(material))
}

/// delete_material
///
/// [Admin Route] Removes a material regardless of its review state.
#[utoipa::path(
    delete,
    path = "/admin/materials/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_material(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    state.reviews.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Docs ---

/// openapi_json
///
/// [Public Route] The generated OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
