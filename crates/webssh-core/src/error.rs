use thiserror::Error;

/// Errors produced by the webssh bridge and session layers.
#[derive(Debug, Error)]
pub enum WebSshError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("max sessions limit ({max}) reached")]
    CapacityExceeded { max: usize },

    #[error("failed to establish SSH connection: {0}")]
    ConnectFailed(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("transcript write failed: {0}")]
    TranscriptWriteFailed(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("remote side closed the connection")]
    RemoteClosed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid connection parameters: {0}")]
    InvalidParams(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for WebSshError {
    fn from(e: serde_json::Error) -> Self {
        WebSshError::ProtocolError(e.to_string())
    }
}

pub type WebSshResult<T> = Result<T, WebSshError>;
