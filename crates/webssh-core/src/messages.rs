//! Bridge wire messages.
//!
//! Every frame is a JSON object with a `type` discriminator. Clients send
//! [`ClientMessage`]s; the server answers with [`ServerMessage`]s.

use crate::size::{DEFAULT_COLS, DEFAULT_ROWS};
use serde::{Deserialize, Serialize};

/// Messages sent by the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Keystrokes to forward to the remote shell.
    Input {
        #[serde(default)]
        data: String,
    },
    /// Terminal resize.
    Resize {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    /// Heartbeat, answered with [`ServerMessage::Pong`].
    Ping,
    /// Any tag this server does not understand.
    #[serde(other)]
    Unknown,
}

/// Messages sent to the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// The session is attached and streaming.
    Connected,
    /// A chunk of decoded terminal output.
    Output { data: String },
    /// The session is missing, not connected, or the handler failed.
    Error { message: String },
    /// The session left the connected state while this client was attached.
    Disconnected { reason: String },
    /// Heartbeat reply.
    Pong,
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

impl ServerMessage {
    pub fn output(data: impl Into<String>) -> Self {
        ServerMessage::Output { data: data.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        ServerMessage::Disconnected {
            reason: reason.into(),
        }
    }
}
