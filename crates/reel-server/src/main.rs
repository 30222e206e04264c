mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use reel_api::middleware::require_auth;
use reel_api::state::{AppState, AppStateInner};
use reel_api::tokens::TokenIssuer;
use reel_api::{users, videos};
use reel_media::{MediaClient, Staging};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::load()?;

    // Init database and media pipeline
    let db = reel_db::Database::open(&config.db_path)?;
    let staging = Staging::new(config.staging_dir.clone()).await?;
    let media = MediaClient::new(config.media_base_url.clone(), config.media_api_key.clone());
    let tokens = TokenIssuer::new(
        config.access_token_secret.clone(),
        config.refresh_token_secret.clone(),
        config.access_ttl_mins,
        config.refresh_ttl_days,
    );

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        tokens,
        staging,
        media,
    });

    // Routes
    let public_user_routes = Router::new()
        .route("/users/register", post(users::register))
        .route("/users/login", post(users::login))
        .route("/users/refresh", post(users::refresh));

    let protected_user_routes = Router::new()
        .route("/users/logout", post(users::logout))
        .route("/users/profile", get(users::profile))
        .route("/users/change-password", post(users::change_password))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Video mutations verify the session in-handler: their sibling routes on
    // the same paths are public, so the middleware cannot wrap them wholesale.
    let video_routes = Router::new()
        .route("/videos", get(videos::list_videos).post(videos::create_video))
        .route(
            "/videos/{id}",
            get(videos::get_video)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route("/videos/{id}/toggle-publish", post(videos::toggle_publish));

    let app = Router::new()
        .merge(public_user_routes)
        .merge(protected_user_routes)
        .merge(video_routes)
        .route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(512 * 1024 * 1024)) // video uploads
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Reel server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Unmatched routes get the same envelope as every other failure.
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "success": false, "message": "route not found" })),
    )
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
