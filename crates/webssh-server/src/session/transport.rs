//! Transport seam between a [`Connection`](super::Connection) and the
//! remote shell.
//!
//! Both traits are synchronous: establishment runs on a blocking worker,
//! and an established transport is non-blocking so the output pump can poll
//! it from an async task.

use super::params::ConnectParams;
use std::time::Duration;
use webssh_core::{TermSize, WebSshResult};

/// Result of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written into the buffer.
    Data(usize),
    /// Nothing available right now.
    Idle,
    /// The remote side closed the channel or the shell exited.
    Closed,
}

/// An established remote shell with a pseudo-terminal attached.
pub trait ShellTransport: Send {
    /// Read whatever output is available without blocking.
    fn try_read(&mut self, buf: &mut [u8]) -> WebSshResult<ReadOutcome>;

    /// Write all of `data` to the shell's stdin.
    fn write_all(&mut self, data: &[u8]) -> WebSshResult<()>;

    /// Propagate new dimensions to the remote pseudo-terminal.
    fn resize(&mut self, size: TermSize) -> WebSshResult<()>;

    /// Release the channel and the underlying session. May block briefly.
    fn close(&mut self) -> WebSshResult<()>;
}

/// Opens [`ShellTransport`]s. Called from a blocking worker thread.
pub trait Connector: Send + Sync {
    /// Connect, authenticate and allocate a pseudo-terminal running a shell.
    ///
    /// `timeout` bounds each network step; failures map to
    /// `WebSshError::ConnectFailed`.
    fn connect(
        &self,
        params: &ConnectParams,
        term: &str,
        timeout: Duration,
    ) -> WebSshResult<Box<dyn ShellTransport>>;
}
