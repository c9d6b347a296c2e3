//! In-memory transport for tests: scripted output, recorded input.

use super::params::ConnectParams;
use super::transport::{Connector, ReadOutcome, ShellTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webssh_core::{TermSize, WebSshError, WebSshResult};

#[derive(Default)]
struct RemoteState {
    output: VecDeque<u8>,
    written: Vec<u8>,
    resizes: Vec<TermSize>,
    echo: bool,
    hung_up: bool,
    fail_reads: bool,
    fail_writes: bool,
    write_delay: Duration,
    close_calls: usize,
    read_calls: usize,
}

/// The far end of a mock shell, shared between the test and its transports.
#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote that echoes every write back as output.
    pub fn echoing() -> Self {
        let remote = Self::new();
        remote.state.lock().unwrap().echo = true;
        remote
    }

    pub fn push_output(&self, data: &[u8]) {
        self.state.lock().unwrap().output.extend(data);
    }

    /// Report EOF once queued output is drained.
    pub fn hang_up(&self) {
        self.state.lock().unwrap().hung_up = true;
    }

    /// Undo [`hang_up`](Self::hang_up) so later transports stay open.
    pub fn reopen(&self) {
        self.state.lock().unwrap().hung_up = false;
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    /// Writes give up as a stalled SSH channel would.
    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    /// Every write blocks for `delay` before completing.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().unwrap().write_delay = delay;
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().written).into_owned()
    }

    pub fn resizes(&self) -> Vec<TermSize> {
        self.state.lock().unwrap().resizes.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().unwrap().read_calls
    }
}

struct MockTransport {
    remote: MockRemote,
}

impl ShellTransport for MockTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> WebSshResult<ReadOutcome> {
        let mut state = self.remote.state.lock().unwrap();
        state.read_calls += 1;
        if state.fail_reads {
            return Err(WebSshError::Transport("connection reset".into()));
        }
        if state.output.is_empty() {
            return Ok(if state.hung_up {
                ReadOutcome::Closed
            } else {
                ReadOutcome::Idle
            });
        }
        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(ReadOutcome::Data(n))
    }

    fn write_all(&mut self, data: &[u8]) -> WebSshResult<()> {
        let delay = self.remote.state.lock().unwrap().write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.remote.state.lock().unwrap();
        if state.fail_writes {
            return Err(WebSshError::Timeout);
        }
        state.written.extend_from_slice(data);
        if state.echo {
            state.output.extend(data);
        }
        Ok(())
    }

    fn resize(&mut self, size: TermSize) -> WebSshResult<()> {
        self.remote.state.lock().unwrap().resizes.push(size);
        Ok(())
    }

    fn close(&mut self) -> WebSshResult<()> {
        self.remote.state.lock().unwrap().close_calls += 1;
        Ok(())
    }
}

/// Hands out transports bound to one [`MockRemote`].
pub struct MockConnector {
    remote: MockRemote,
    failure: Option<String>,
    delay: Duration,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(remote: MockRemote) -> Self {
        Self {
            remote,
            failure: None,
            delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(MockRemote::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _params: &ConnectParams,
        _term: &str,
        _timeout: Duration,
    ) -> WebSshResult<Box<dyn ShellTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.failure {
            Some(message) => Err(WebSshError::ConnectFailed(message.clone())),
            None => Ok(Box::new(MockTransport {
                remote: self.remote.clone(),
            })),
        }
    }
}
