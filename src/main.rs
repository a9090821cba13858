//! Chess Arena Back binary entrypoint wiring matchmaking, live games and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chess_arena_back::{
    auth::JwtVerifier,
    config::AppConfig,
    dao::{
        game_export::{GameExporter, LogOnlyExporter},
        game_store::InMemoryGameStore,
    },
    routes,
    services::{export_worker::ExportQueue, matchmaking_service},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let secret = config
        .auth
        .jwt_secret
        .clone()
        .context("no token secret configured; set JWT_SECRET or auth.jwt_secret")?;
    let verifier = Arc::new(JwtVerifier::new(secret.as_bytes()));
    let exports = ExportQueue::spawn(build_exporter(&config)?, &config.export);

    let app_state = AppState::new(config, verifier, exports);

    spawn_storage(app_state.clone());
    tokio::spawn(matchmaking_service::run_liveness_sweep(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the finished-game exporter from the configured endpoint.
fn build_exporter(config: &AppConfig) -> anyhow::Result<Arc<dyn GameExporter>> {
    match config.export.endpoint.as_deref() {
        #[cfg(feature = "http-export")]
        Some(endpoint) => {
            let exporter = chess_arena_back::dao::game_export::HttpGameExporter::new(endpoint)
                .context("building HTTP exporter")?;
            info!(endpoint, "exporting finished games over HTTP");
            Ok(Arc::new(exporter))
        }
        #[cfg(not(feature = "http-export"))]
        Some(endpoint) => {
            tracing::warn!(endpoint, "built without http-export; finished games are only logged");
            Ok(Arc::new(LogOnlyExporter))
        }
        None => {
            info!("no export endpoint configured; finished games are only logged");
            Ok(Arc::new(LogOnlyExporter))
        }
    }
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise install the in-memory store.
fn spawn_storage(state: SharedState) {
    #[cfg(feature = "mongo-store")]
    if let Ok(uri) = env::var("MONGO_URI") {
        use chess_arena_back::{
            dao::{
                game_store::{
                    GameStore,
                    mongodb::{MongoConfig, MongoGameStore},
                },
                storage::StorageError,
            },
            services::storage_supervisor,
        };

        let db_name = env::var("MONGO_DB").ok();
        tokio::spawn(storage_supervisor::run(state, move || {
            let uri = uri.clone();
            let db_name = db_name.clone();
            async move {
                let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
                let store = MongoGameStore::connect(config).await?;
                Ok::<Arc<dyn GameStore>, StorageError>(Arc::new(store))
            }
        }));
        return;
    }

    info!("MONGO_URI not set; using the in-memory game store");
    tokio::spawn(async move {
        state
            .install_game_store(Arc::new(InMemoryGameStore::new()))
            .await;
    });
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
