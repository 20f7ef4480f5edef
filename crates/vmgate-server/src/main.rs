//! vmgate-server: on-demand VM sessions with a WebSocket display stream.
//!
//! Starts containers through the docker CLI, waits for each one's display
//! port to come up, and relays that port to browser clients over WebSocket.

mod config;
mod gateway;
mod relay;
mod runtime;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use runtime::DockerRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// vmgate-server: VM session gateway
#[derive(Parser, Debug)]
#[command(name = "vmgate-server", version, about = "VM session gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.vmgate/config.toml")]
    config: String,

    /// Container image for new sessions
    #[arg(long)]
    image: Option<String>,

    /// Container network sessions join
    #[arg(long)]
    network: Option<String>,

    /// Allowed CORS origin for the HTTP API (repeatable)
    #[arg(long = "allowed-origin", env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting vmgate-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        port: cli.port,
        bind: cli.bind,
        image: cli.image,
        network: cli.network,
        allowed_origins: cli.allowed_origins,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let runtime = Arc::new(
        DockerRuntime::new(
            &server_config.docker,
            &server_config.image,
            &server_config.network,
        )
        .with_command_timeout(server_config.command_timeout),
    );

    if let Err(e) = server::run(server_config, runtime, shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("vmgate-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    info!("received shutdown signal");
}
