//! Documentation of a blog engagement backend.
//!
//! Counts article views, keeps likes on articles, comments and talks, tracks daily unique visitors
//! and assembles the article detail page.
//!
//!
//!
//! # General Infrastructure
//! - Front end calls this service directly through the reverse proxy
//! - Proxy sets `X-Forwarded-For` and `X-Region` before forwarding
//! - Redis holds every counter, membership set and cached configuration blob
//! - The article table lives elsewhere; this service reads a JSON snapshot of it at start
//! - Daily visitor history is appended to a JSON-lines file
//!
//!
//!
//! # Request Flow
//!
//! ## Article detail
//! - Point lookup of the article; hidden or missing articles are a 404
//! - Recommended, newest and hot sections run as separate tasks with a shared time limit
//! - Previous and next links are looked up alongside
//! - The view is counted, then counts are read back
//! - A section that fails or runs out of time is left empty and listed under `degraded`
//!
//! ## Likes
//! - `POST /{kind}/{id}/like` with `X-User-Id` flips the like and returns the new count
//! - Membership check, membership change and counter change are separate atomic commands
//!
//! ## Visitors
//! - `POST /report` fingerprints ip + user agent and counts it once per day
//! - At 00:00 the previous day's unique visitors are appended to history
//! - At 00:01 the window is emptied, after making sure the snapshot exists
//!
//!
//!
//! # Notes
//!
//! ## Redis only
//! Every mutation is a single Redis command. Redis serializes them, so no request ever takes an
//! application lock. The cost is that a like toggle is not one transaction; two concurrent toggles
//! by the same user can drift the counter. Acceptable for a social counter.
//!
//! ## Configuration cache
//! Site settings and page covers are cache-aside with no TTL. Writes go to the file first, then
//! drop the cached copy; the next read repopulates it.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! `````
//!
//! Run locally against a Redis on the default port.
//! ```sh
//! RUST_LOG=info cargo run -p blog-server
//! ```
//!
//! Drive some traffic at it.
//! ```sh
//! cargo run -p tester -- --views 200 --article 1
//! ```
use std::time::Duration;

use axum::http::{Method, header::CONTENT_TYPE};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal, sync::watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod cache;
pub mod catalog;
pub mod config;
pub mod counter;
pub mod database;
pub mod detail;
pub mod error;
pub mod history;
pub mod keys;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod store;
pub mod toggle;
pub mod utils;
pub mod visitor;

use config::Config;
use error::AppError;
use routes::router;
use state::State;

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = state
        .reconciler
        .clone()
        .spawn(state.config.schedule, shutdown_rx);
    info!(
        "Scheduled visitor snapshot at {} and clear at {} ({})",
        state.config.schedule.snapshot, state.config.schedule.clear, state.config.time_zone
    );

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = router(state.clone()).layer(cors);

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.map_err(AppError::Server)?;
    info!("Server running on {address}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    for job in jobs {
        if let Err(e) = job.await {
            error!("Reconciler job ended abnormally: {e}");
        }
    }

    info!("Server shutting down...");

    served.map_err(AppError::Server)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
