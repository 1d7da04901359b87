use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use study_portal::{
    AppState, Backends,
    clock::{ClockState, SystemClock},
    config::{AppConfig, Env},
    create_router,
    repository::PostgresRepository,
    storage::{S3StorageClient, StorageService, StorageState},
    store::{KeyStoreState, RedisKeyStore},
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initialises logging, connects the relational store,
/// the key store and object storage, then serves the router.
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "study_portal=debug,tower_http=info,axum=trace".into());

    // Pretty logs for humans locally, JSON for aggregators in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
    let repo = Arc::new(PostgresRepository::new(pool));

    let store = RedisKeyStore::connect(&config.redis_url, config.store_timeout)
        .await
        .expect("FATAL: Failed to connect to Redis. Check REDIS_URL.");
    let store = Arc::new(store) as KeyStoreState;

    let s3_client = S3StorageClient::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.s3_bucket,
    );
    if config.env == Env::Local {
        s3_client.ensure_bucket_exists().await;
    }
    let storage = Arc::new(s3_client) as StorageState;

    let backends = Backends {
        clock: Arc::new(SystemClock) as ClockState,
        store,
        users: repo.clone(),
        settings: repo.clone(),
        materials: repo,
        storage,
    };

    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState::build(config, backends));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("OpenAPI document available at /api-docs/openapi.json");

    // Connect info feeds the login throttle when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("HTTP server terminated unexpectedly");
}
