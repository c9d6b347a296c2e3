//! webssh-core: Shared protocol library for the Web SSH bridge.
//!
//! Provides the JSON bridge message types, frame codec, terminal size
//! bounds, session identifiers and the error taxonomy shared by the server
//! and any embedding API layer.

pub mod codec;
pub mod error;
pub mod id;
pub mod messages;
pub mod size;

// Re-export commonly used items at crate root.
pub use codec::{decode_client, encode_server, OutputDecoder};
pub use error::{WebSshError, WebSshResult};
pub use id::{generate_session_id, SessionId};
pub use messages::{ClientMessage, ServerMessage};
pub use size::TermSize;
