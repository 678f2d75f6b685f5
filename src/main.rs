//! # TTS Groq Bridge - Main Application Entry Point
//!
//! A WebSocket service that turns text requests from an orchestration host
//! into paced streams of 24 kHz mono PCM, using the Groq (OpenAI-compatible)
//! speech endpoint for synthesis.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment)
//! - **state**: Shared state: session counter, synthesis client, shutdown flag
//! - **protocol**: MessagePack wire messages and the outbound sink abstraction
//! - **session**: Per-connection lifecycle (handshake, then message dispatch)
//! - **synthesis**: HTTP client for the upstream speech API
//! - **audio**: WAV decoding and chunked, paced streaming
//! - **websocket**: actix actor that terminates each socket
//! - **health**: Static build-info endpoint
//! - **error**: Error taxonomy and client-facing messages

mod audio;
mod config;
mod error;
mod health;
mod protocol;
mod session;
mod state;
mod synthesis;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Route table shared by the server and the end-to-end tests.
///
/// Every path other than the build-info endpoint is a WebSocket upgrade.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/build_info", web::get().to(health::build_info))
        .default_service(web::to(websocket::bridge_websocket));
}

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing();

    let config = AppConfig::load()?;
    if let Err(err) = config.validate() {
        error!("Invalid configuration: {:#}", err);
        return Err(err);
    }

    info!(
        service = %config.server.service_name,
        service_version = %config.server.service_version,
        "Starting tts-groq-bridge v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        model = %config.upstream.model,
        voice = %config.upstream.voice,
        max_sessions = config.sessions.max_concurrent_sessions,
        "Upstream: {}",
        config.upstream.url
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting WebSocket server on ws://{}", bind_addr);

    let data = web::Data::new(app_state.clone());
    let server = HttpServer::new(move || {
        // Browser dashboards read build info cross-origin
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET"])
            .max_age(3600);

        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(routes)
    })
    // Shutdown is driven by `shutdown_signal` below
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, refusing new sessions");
            app_state.mark_unavailable();
            server_handle.stop(true).await;
        }
    }

    info!(
        uptime_seconds = app_state.get_uptime_seconds(),
        active_sessions = app_state.sessions.active(),
        "Server stopped"
    );
    Ok(())
}

/// Set up structured logging.
///
/// `RUST_LOG` overrides the default `tts_groq_bridge=info,actix_web=info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tts_groq_bridge=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers, falling back to Ctrl+C: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}
