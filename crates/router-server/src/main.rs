mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handlers::*;
use crate::state::{build_router, create_default_config, load_config, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "router.toml")]
    config: PathBuf,
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.config.exists() {
        warn!("config file missing, creating default config");
        if let Err(err) = create_default_config(&args.config) {
            warn!(error = %err, "could not write default config");
        }
    }

    let config = load_config(&args.config)?;
    let router = build_router(config).await?;
    let state = Arc::new(AppState::new(router));

    let api_routes = Router::new()
        .route("/select", post(select_channel))
        .route("/channels/:id", get(get_channel))
        .route("/channels/:id/info", get(get_channel_info))
        .route("/channels/:id/usage", get(get_channel_usage))
        .route("/channels/:id/status", put(set_channel_status))
        .route("/channels/:id/sync", post(sync_channel))
        .route("/channels/:id/deleted", post(channel_deleted))
        .route("/abilities/repair", post(repair_abilities))
        .route("/abilities/tags/:tag", put(update_tag))
        .route("/abilities/tags/:tag/status", put(set_tag_status))
        .route("/cache/reload", post(reload_cache))
        .route("/models", get(list_models));

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("router-server listening on {}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
