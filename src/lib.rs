use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use chrono::FixedOffset;
use utoipa::OpenApi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Access-control and quota core. Transport-agnostic.
pub mod clock;
pub mod download;
pub mod keys;
pub mod login;
pub mod password;
pub mod rate_limit;
pub mod review;
pub mod revocation;
pub mod session;
pub mod store;
pub mod token;

// Infrastructure adapters and the HTTP surface.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;
pub mod storage;

use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use clock::{Clock, ClockState, SystemClock};
pub use config::AppConfig;
pub use download::DownloadService;
pub use login::LoginService;
pub use rate_limit::{
    ConfigStoreState, DownloadQuota, LoginLimits, LoginTarget, LoginThrottle, RateLimiter,
};
pub use repository::{MaterialRepositoryState, PostgresRepository};
pub use review::ReviewWorkflow;
pub use session::{SessionManager, SessionPolicy, UserDirectoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};
pub use store::{InMemoryKeyStore, KeyStoreState, RedisKeyStore};
pub use token::TokenCodec;

/// ApiDoc
///
/// OpenAPI document for every `#[utoipa::path]` handler, served as JSON at
/// `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::register, handlers::change_password, handlers::refresh,
        handlers::logout, handlers::get_me,
        handlers::create_material, handlers::update_material, handlers::get_material,
        handlers::get_download_url, handlers::review_material, handlers::delete_material
    ),
    components(
        schemas(
            models::Material, models::MaterialStatus, models::ReviewOutcome,
            models::LoginRequest, models::RegisterRequest, models::ChangePasswordRequest,
            models::RefreshRequest, models::CreateMaterialRequest,
            models::UpdateMaterialRequest, models::ReviewMaterialRequest,
            models::DownloadUrlResponse, models::UserProfile,
            session::TokenPair, login::LoginOutcome, token::Role,
        )
    ),
    tags(
        (name = "study-portal", description = "Study material access control and moderation API")
    )
)]
pub struct ApiDoc;

/// Backends
///
/// The external collaborators everything else is built on.
#[derive(Clone)]
pub struct Backends {
    pub clock: ClockState,
    pub store: KeyStoreState,
    pub users: UserDirectoryState,
    pub settings: ConfigStoreState,
    pub materials: MaterialRepositoryState,
    pub storage: StorageState,
}

/// AppState
///
/// Single shared container for configuration and the core services. Handlers
/// pull what they need through `State` or `FromRef`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: SessionManager,
    pub login: LoginService,
    pub reviews: ReviewWorkflow,
    pub downloads: DownloadService,
}

impl AppState {
    /// Wires the core services over `backends` using the limits and
    /// lifetimes from `config`.
    pub fn build(config: AppConfig, backends: Backends) -> Self {
        let Backends {
            clock,
            store,
            users,
            settings,
            materials,
            storage,
        } = backends;

        let codec = TokenCodec::new(config.jwt_secret.as_bytes(), clock.clone());
        let sessions = SessionManager::new(
            codec,
            store.clone(),
            users.clone(),
            clock.clone(),
            SessionPolicy {
                access_ttl: config.access_ttl,
            },
        );

        let limiter = RateLimiter::new(store, clock.clone());
        let login = LoginService::new(
            LoginThrottle::new(limiter.clone(), LoginLimits::default()),
            users,
            sessions.clone(),
        );

        let timezone: FixedOffset = config.server_offset;
        let quota = DownloadQuota::new(limiter, settings, clock.clone(), timezone);
        let downloads = DownloadService::new(materials.clone(), quota, storage);
        let reviews = ReviewWorkflow::new(materials, clock);

        Self {
            config,
            sessions,
            login,
            reviews,
            downloads,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for SessionManager {
    fn from_ref(app_state: &AppState) -> SessionManager {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request through the `AuthUser` extractor before any
/// authenticated handler runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the route modules, the auth layer and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest("/admin", admin::admin_routes())
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying the `x-request-id` so every log line of a request
/// can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
