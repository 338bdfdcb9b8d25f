//! lanrelay-server: LAN world relay.
//!
//! Hands out join codes for hosted worlds and relays WebRTC signaling between
//! a world's host and the clients that join it, over WebSocket.

mod auth;
mod config;
mod relay;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::RelayConfig;
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info};

/// lanrelay-server: LAN world relay
#[derive(Parser, Debug)]
#[command(name = "lanrelay-server", version, about = "LAN world relay")]
struct Cli {
    /// Listen address, overrides `server.listen`
    #[arg(short, long)]
    listen: Option<String>,

    /// Config file path (created or refreshed with default keys on start)
    #[arg(short, long, default_value = "relay.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Config first: its debug flag feeds the default log level.
    let config_path = PathBuf::from(&cli.config);
    let loaded = RelayConfig::load(Some(&config_path), cli.listen.as_deref());

    use tracing_subscriber::EnvFilter;
    let default_level = match (&cli.log_level, &loaded) {
        (Some(level), _) => level.clone(),
        (None, Ok(cfg)) if cfg.debug => "debug".to_string(),
        _ => "info".to_string(),
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let relay_config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %relay_config.listen,
        "starting lanrelay-server"
    );

    let relay_server = match RelayServer::new(relay_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = relay_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("lanrelay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
