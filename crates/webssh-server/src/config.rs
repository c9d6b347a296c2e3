//! Server configuration: TOML file + CLI overrides.

use crate::session::ConnectionSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webssh_core::{WebSshError, WebSshResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub transcript: TranscriptSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds a detached session may stay idle; 0 disables reaping.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Browser origins allowed to open the bridge; empty allows any.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            idle_timeout: default_idle_timeout(),
            allowed_origins: Vec::new(),
        }
    }
}

/// `[ssh]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            term: default_term(),
            poll_interval_ms: default_poll_interval_ms(),
            read_chunk: default_read_chunk(),
        }
    }
}

/// `[transcript]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSection {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for TranscriptSection {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_sessions() -> usize {
    100
}
fn default_idle_timeout() -> u64 {
    3600
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_read_chunk() -> usize {
    4096
}
fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_flush_threshold() -> usize {
    100
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    pub idle_timeout: u64,
    pub allowed_origins: Vec<String>,
    pub connect_timeout: u64,
    pub term: String,
    pub poll_interval_ms: u64,
    pub read_chunk: usize,
    pub log_dir: PathBuf,
    pub flush_threshold: usize,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_max_sessions: Option<usize>,
        cli_idle_timeout: Option<u64>,
        cli_log_dir: Option<&str>,
    ) -> WebSshResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::from_file(
            file_config,
            cli_host,
            cli_port,
            cli_max_sessions,
            cli_idle_timeout,
            cli_log_dir,
        ))
    }

    fn from_file(
        file: ConfigFile,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_max_sessions: Option<usize>,
        cli_idle_timeout: Option<u64>,
        cli_log_dir: Option<&str>,
    ) -> Self {
        let log_dir = cli_log_dir
            .map(|s| s.to_string())
            .unwrap_or(file.transcript.log_dir);

        Self {
            host: cli_host.map(|s| s.to_string()).unwrap_or(file.server.host),
            port: cli_port.unwrap_or(file.server.port),
            max_sessions: cli_max_sessions.unwrap_or(file.server.max_sessions),
            idle_timeout: cli_idle_timeout.unwrap_or(file.server.idle_timeout),
            allowed_origins: file.server.allowed_origins,
            connect_timeout: file.ssh.connect_timeout,
            term: file.ssh.term,
            poll_interval_ms: file.ssh.poll_interval_ms,
            read_chunk: file.ssh.read_chunk.max(1),
            log_dir: expand_tilde_str(&log_dir),
            flush_threshold: file.transcript.flush_threshold,
        }
    }

    /// Per-connection settings derived from this config.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            term: self.term.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            read_chunk: self.read_chunk,
            log_dir: self.log_dir.clone(),
            flush_threshold: self.flush_threshold,
            ..ConnectionSettings::default()
        }
    }

    /// Idle timeout for detached sessions, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

fn parse_config(content: &str) -> WebSshResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| WebSshError::Other(format!("config parse error: {e}")))
}

/// Parse a `[user@]host[:port]` target into `(user, host, port)`.
///
/// If no user is given, defaults to the current system username (or "root");
/// the port defaults to 22.
pub fn parse_target(target: &str) -> WebSshResult<(String, String, u16)> {
    let (user, host_port) = match target.split_once('@') {
        Some((user, rest)) => {
            if user.is_empty() {
                return Err(WebSshError::InvalidParams(format!(
                    "empty username in target '{target}'"
                )));
            }
            (user.to_string(), rest)
        }
        None => {
            let user = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "root".into());
            (user, target)
        }
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| WebSshError::InvalidParams(format!("invalid port in '{target}'")))?;
            (host, port)
        }
        None => (host_port, 22),
    };

    if host.is_empty() {
        return Err(WebSshError::InvalidParams(format!(
            "empty host in target '{target}'"
        )));
    }
    Ok((user, host.to_string(), port))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
