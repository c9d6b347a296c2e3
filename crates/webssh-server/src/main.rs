//! webssh-server: web SSH session manager and terminal bridge.
//!
//! Holds SSH sessions open on behalf of browser clients, which attach to
//! them over WebSocket at `/ws/ssh/{session_id}`.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use webssh_core::generate_session_id;
use webssh_server::config::{parse_target, ServerConfig};
use webssh_server::server::WebSshServer;
use webssh_server::session::{AuthSecret, ConnectParams, ConnectionRegistry, SshConnector};

/// webssh-server: web SSH terminal bridge
#[derive(Parser, Debug)]
#[command(name = "webssh-server", version, about = "Web SSH terminal bridge")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.webssh/config.toml")]
    config: String,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Idle timeout in seconds for detached sessions (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Transcript directory
    #[arg(long)]
    log_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Open a session at startup: user@host[:port]
    #[arg(long)]
    connect: Option<String>,

    /// Environment variable holding the password for --connect
    #[arg(long, conflicts_with = "identity")]
    password_env: Option<String>,

    /// Private key file for --connect
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Environment variable holding the private key passphrase
    #[arg(long, requires = "identity")]
    passphrase_env: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting webssh-server");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.host.as_deref(),
        cli.port,
        cli.max_sessions,
        cli.idle_timeout,
        cli.log_dir.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = WebSshServer::new(server_config, Arc::new(SshConnector::new()));
    let registry = server.registry();

    if let Some(target) = cli.connect.as_deref() {
        if let Err(e) = open_startup_session(&registry, &cli, target).await {
            error!("startup session failed: {e:#}");
            std::process::exit(1);
        }
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                registry.shutdown_all().await;
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    registry.shutdown_all().await;
    info!("webssh-server stopped");
}

async fn open_startup_session(
    registry: &ConnectionRegistry,
    cli: &Cli,
    target: &str,
) -> anyhow::Result<()> {
    let (username, host, port) = parse_target(target)?;

    let auth = if let Some(path) = &cli.identity {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read identity file {}", path.display()))?;
        let passphrase = cli.passphrase_env.as_deref().map(read_env).transpose()?;
        AuthSecret::PrivateKey { pem, passphrase }
    } else if let Some(var) = cli.password_env.as_deref() {
        AuthSecret::Password(read_env(var)?)
    } else {
        bail!("--connect needs --password-env or --identity");
    };

    let params = ConnectParams::new(host, port, username, auth);
    let session_id = generate_session_id();
    registry
        .create(session_id.clone(), params)
        .await
        .with_context(|| format!("cannot connect to {target}"))?;
    info!(session_id = %session_id, target_host = target, "startup session ready");
    Ok(())
}

fn read_env(var: &str) -> anyhow::Result<String> {
    std::env::var(var).with_context(|| format!("environment variable {var} is not set"))
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
