//! Session management: SSH transport, connection lifecycle, output pump,
//! transcripts and the connection registry.

pub mod connection;
pub mod params;
pub mod pump;
pub mod registry;
pub mod ssh;
pub mod transcript;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::{
    CloseReason, Connection, ConnectionSettings, ConnectionState, SessionInfo, SubscriberId,
};
pub use params::{AuthSecret, ConnectParams};
pub use registry::{ConnectionRegistry, SessionHandle};
pub use ssh::SshConnector;
pub use transcript::{Direction, TranscriptEntry, TranscriptSink};
pub use transport::{Connector, ReadOutcome, ShellTransport};
