//! Startup helpers for the converse binaries.

use std::process::ExitCode;
use std::sync::Arc;

use crate::cli;
use crate::exchange::{EngineConfig, ExchangeController, HttpTransport, SessionId, SessionStore};
use crate::server::{self, AppState};

/// Environment variable naming the session to talk in.
const SESSION_ENV: &str = "CONVERSE_SESSION";

/// Environment variable overriding the stub server port.
const PORT_ENV: &str = "CONVERSE_PORT";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` refines the filter; `info` is always enabled.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the interactive client (used by the `converse` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` when stdin closes or `/quit` is typed, `1` on failure.
#[must_use]
pub fn run_client() -> ExitCode {
    init_tracing();

    let config = EngineConfig::from_env();
    tracing::info!("Exchange endpoint base: {}", config.base_url);

    let session_id = std::env::var(SESSION_ENV)
        .map_or_else(|_| SessionId::new(uuid::Uuid::new_v4().to_string()), SessionId::from);
    let store = Arc::new(SessionStore::new(session_id, config.default_model.clone()));

    let transport = match HttpTransport::new(config) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!("Failed to create transport: {e}");
            return ExitCode::from(1);
        }
    };
    let controller = Arc::new(ExchangeController::new(store, transport));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(cli::run_repl(controller)) {
        tracing::error!("Client error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Run the stub exchange server (used by the `converse-stub-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_stub_server() -> ExitCode {
    init_tracing();

    tracing::info!("Starting converse stub server v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(
        AppState::new(),
        get_port(),
        shutdown,
    )) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
