//! Startup helpers for the Aurora reply server.

use std::process::ExitCode;

use crate::server::{self, AppState};

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "AURORA_PORT";

/// Run the server (used by the `aurora-server` binary).
///
/// Stops on Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Aurora reply server v{}", env!("CARGO_PKG_VERSION"));

    // The Ollama client is blocking and must be built outside the runtime.
    let state = match AppState::from_ollama() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };

    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(state, port, shutdown)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    parse_port(std::env::var(PORT_ENV).ok().as_deref())
}

fn parse_port(raw: Option<&str>) -> u16 {
    raw.and_then(|p| p.trim().parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(Some("8080")), 8080);
        assert_eq!(parse_port(Some("nope")), server::DEFAULT_PORT);
        assert_eq!(parse_port(None), server::DEFAULT_PORT);
    }
}
