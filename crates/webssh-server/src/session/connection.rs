//! One remote shell session.
//!
//! A [`Connection`] owns its transport, terminal size, transcript and the
//! single output-subscriber slot. State moves
//! `Connecting → Connected → Closing → Closed`, with `Failed` reachable
//! while connecting. Every field is synchronized on its own so the output
//! pump, an attached bridge and the registry never contend on one lock.

use super::params::ConnectParams;
use super::pump;
use super::transcript::{transcript_path, Direction, TranscriptSink};
use super::transport::{Connector, ReadOutcome, ShellTransport};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use webssh_core::{SessionId, TermSize, WebSshError, WebSshResult};

/// Tunables shared by every connection a registry creates.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Upper bound on connect + authenticate + PTY allocation.
    pub connect_timeout: Duration,
    /// TERM value requested for the remote pseudo-terminal.
    pub term: String,
    /// Pump sleep between empty polls.
    pub poll_interval: Duration,
    /// Maximum bytes read per poll.
    pub read_chunk: usize,
    /// Root directory for transcripts.
    pub log_dir: PathBuf,
    /// Buffered transcript entries that trigger a flush.
    pub flush_threshold: usize,
    /// Output chunks queued for a subscriber before the pump waits.
    pub subscriber_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            term: "xterm-256color".to_string(),
            poll_interval: Duration::from_millis(10),
            read_chunk: 4096,
            log_dir: PathBuf::from("./logs"),
            flush_threshold: 100,
            subscriber_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

/// Why a connection left the connected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit close through the registry.
    Requested,
    /// The remote shell exited or the channel hit EOF.
    RemoteClosed,
    /// Reading from the transport failed.
    ReadError(String),
    /// Process shutdown.
    Shutdown,
    /// Detached for longer than the idle timeout.
    IdleTimeout,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("session closed"),
            CloseReason::RemoteClosed => f.write_str("connection closed by remote host"),
            CloseReason::ReadError(e) => write!(f, "read error: {e}"),
            CloseReason::Shutdown => f.write_str("server shutting down"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Identifies one attachment of an output subscriber.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<String>,
}

/// Point-in-time view of a connection, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub display_name: String,
    pub state: ConnectionState,
    pub size: TermSize,
    pub created_at: DateTime<Local>,
    pub idle_secs: u64,
    pub transcript_path: PathBuf,
    pub subscribed: bool,
}

pub struct Connection {
    id: SessionId,
    host: String,
    port: u16,
    username: String,
    display_name: String,
    created_at: DateTime<Local>,
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
    close_reason: Mutex<Option<CloseReason>>,
    /// Shared with blocking workers for writes, resizes and close.
    transport: Arc<Mutex<Option<Box<dyn ShellTransport>>>>,
    size: Mutex<TermSize>,
    subscriber: Mutex<Option<Subscriber>>,
    next_subscriber: AtomicU64,
    last_activity: Mutex<Instant>,
    transcript: TranscriptSink,
    /// Receives this session's ID once teardown has completed.
    teardown_tx: Option<mpsc::UnboundedSender<SessionId>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("target", &format_args!("{}@{}:{}", self.username, self.host, self.port))
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Create a connection in the `Connecting` state. The transcript path is
    /// fixed here from the display name and creation time.
    pub fn new(
        id: SessionId,
        params: &ConnectParams,
        settings: ConnectionSettings,
        teardown_tx: Option<mpsc::UnboundedSender<SessionId>>,
    ) -> Self {
        let created_at = Local::now();
        let path = transcript_path(&settings.log_dir, &params.display_name, created_at);
        let transcript = TranscriptSink::new(path, settings.flush_threshold);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        Self {
            id,
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            display_name: params.display_name.clone(),
            created_at,
            settings,
            state,
            close_reason: Mutex::new(None),
            transport: Arc::new(Mutex::new(None)),
            size: Mutex::new(params.size),
            subscriber: Mutex::new(None),
            next_subscriber: AtomicU64::new(1),
            last_activity: Mutex::new(Instant::now()),
            transcript,
            teardown_tx,
        }
    }

    /// Open the transport on a blocking worker, bounded by the connect
    /// timeout. On success the connection becomes `Connected` and its output
    /// pump starts; on any failure it becomes `Failed`.
    pub async fn establish(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
        params: ConnectParams,
    ) -> WebSshResult<()> {
        if self.state() != ConnectionState::Connecting {
            return Err(WebSshError::Other(format!(
                "session {} is not in the connecting state",
                self.id
            )));
        }

        info!(
            session_id = %self.id,
            target_host = %params.target(),
            auth = params.auth.method(),
            "connecting SSH session"
        );

        let term = self.settings.term.clone();
        let timeout = self.settings.connect_timeout;
        let attempt = tokio::task::spawn_blocking(move || connector.connect(&params, &term, timeout));
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(WebSshError::ConnectFailed(format!("connect worker failed: {join}"))),
            Err(_) => Err(WebSshError::ConnectFailed(format!(
                "timed out after {}s",
                timeout.as_secs_f32()
            ))),
        };

        let transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                let e = match e {
                    WebSshError::ConnectFailed(_) => e,
                    other => WebSshError::ConnectFailed(other.to_string()),
                };
                error!(session_id = %self.id, error = %e, "SSH connection failed");
                self.state.send_replace(ConnectionState::Failed);
                self.transcript.flush().await;
                return Err(e);
            }
        };

        *lock(&self.transport) = Some(transport);
        let promoted = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });

        if !promoted {
            // Torn down while the handshake was in flight.
            let taken = lock(&self.transport).take();
            if let Some(mut transport) = taken {
                let _ = tokio::task::spawn_blocking(move || transport.close()).await;
            }
            return Err(WebSshError::ConnectFailed("session closed during connect".into()));
        }

        pump::spawn(Arc::clone(self));
        info!(session_id = %self.id, "SSH session connected");
        Ok(())
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Why the connection closed, once it has started closing.
    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.close_reason).clone()
    }

    pub fn size(&self) -> TermSize {
        *lock(&self.size)
    }

    pub fn transcript(&self) -> &TranscriptSink {
        &self.transcript
    }

    pub(crate) fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Time since the last input, resize or subscriber attach.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Forward keystrokes to the remote shell. Returns `false` if the
    /// connection is not `Connected` or the write fails.
    pub async fn send(&self, text: &str) -> bool {
        match self.write(text).await {
            Ok(()) => true,
            Err(WebSshError::NotConnected) => false,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to send data");
                false
            }
        }
    }

    /// Typed form of [`send`](Self::send).
    pub async fn write(&self, text: &str) -> WebSshResult<()> {
        if !self.is_connected() {
            return Err(WebSshError::NotConnected);
        }
        let data = text.as_bytes().to_vec();
        self.with_transport(move |transport| transport.write_all(&data)).await?;
        self.touch();
        self.transcript.record(Direction::Input, text);
        Ok(())
    }

    /// Resize the remote pseudo-terminal. Returns `false` if the connection
    /// is not `Connected` or the request fails.
    pub async fn resize(&self, cols: u16, rows: u16) -> bool {
        match self.set_size(TermSize::new(cols, rows)).await {
            Ok(()) => true,
            Err(WebSshError::NotConnected) => false,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to resize terminal");
                false
            }
        }
    }

    /// Typed form of [`resize`](Self::resize).
    pub async fn set_size(&self, size: TermSize) -> WebSshResult<()> {
        if !self.is_connected() {
            return Err(WebSshError::NotConnected);
        }
        self.with_transport(move |transport| transport.resize(size)).await?;
        *lock(&self.size) = size;
        self.touch();
        debug!(session_id = %self.id, size = %size, "terminal resized");
        Ok(())
    }

    /// Run a transport call on a blocking worker. Writes and resizes may
    /// retry for a while and must not stall the runtime.
    async fn with_transport<F>(&self, op: F) -> WebSshResult<()>
    where
        F: FnOnce(&mut Box<dyn ShellTransport>) -> WebSshResult<()> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || match lock(&transport).as_mut() {
            Some(transport) => op(transport),
            None => Err(WebSshError::NotConnected),
        })
        .await
        .map_err(|e| WebSshError::Other(format!("transport worker failed: {e}")))?
    }

    /// Attach an output subscriber, replacing any current one (whose
    /// receiver then closes). Returns the attachment ID to detach with.
    pub fn attach_subscriber(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.settings.subscriber_capacity.max(1));
        let previous = lock(&self.subscriber).replace(Subscriber { id, tx });
        if let Some(previous) = previous {
            info!(session_id = %self.id, replaced = previous.id, subscriber = id, "output subscriber replaced");
        } else {
            debug!(session_id = %self.id, subscriber = id, "output subscriber attached");
        }
        self.touch();
        (id, rx)
    }

    /// Clear the subscriber slot if `id` still owns it.
    pub fn detach_subscriber(&self, id: SubscriberId) -> bool {
        let mut slot = lock(&self.subscriber);
        if slot.as_ref().map(|s| s.id) == Some(id) {
            *slot = None;
            drop(slot);
            self.touch();
            debug!(session_id = %self.id, subscriber = id, "output subscriber detached");
            true
        } else {
            false
        }
    }

    pub fn has_subscriber(&self) -> bool {
        lock(&self.subscriber).is_some()
    }

    /// Non-blocking read used by the output pump. Reports `Idle` while a
    /// write or resize holds the transport.
    pub(crate) fn poll_output(&self, buf: &mut [u8]) -> WebSshResult<ReadOutcome> {
        let mut transport = match self.transport.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(ReadOutcome::Idle),
        };
        match transport.as_mut() {
            Some(transport) => transport.try_read(buf),
            None => Err(WebSshError::NotConnected),
        }
    }

    /// Transcribe a decoded output chunk and hand it to the subscriber, if any.
    pub(crate) async fn forward_output(&self, text: String) {
        self.transcript.record(Direction::Output, text.clone());
        let tx = lock(&self.subscriber).as_ref().map(|s| s.tx.clone());
        if let Some(tx) = tx {
            if tx.send(text).await.is_err() {
                debug!(session_id = %self.id, "output subscriber went away");
            }
        }
    }

    /// Tear the connection down. Idempotent and safe to race: the first
    /// caller releases the transport, flushes the transcript and emits the
    /// teardown notice; later callers wait for the terminal state.
    pub async fn disconnect(&self, reason: CloseReason) {
        let mut won = false;
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                *state = ConnectionState::Closing;
                *lock(&self.close_reason) = Some(reason.clone());
                won = true;
                true
            } else {
                false
            }
        });

        if !won {
            let mut state_rx = self.state.subscribe();
            let _ = state_rx.wait_for(|s| s.is_terminal()).await;
            return;
        }

        info!(session_id = %self.id, reason = %reason, "disconnecting SSH session");

        let shared = Arc::clone(&self.transport);
        let release = tokio::task::spawn_blocking(move || {
            let taken = lock(&shared).take();
            taken.map(|mut transport| transport.close())
        });
        match release.await {
            Ok(None) | Ok(Some(Ok(()))) => {}
            Ok(Some(Err(e))) => {
                warn!(session_id = %self.id, error = %e, "error releasing SSH transport")
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "transport release task failed")
            }
        }

        self.transcript.close().await;
        self.state.send_replace(ConnectionState::Closed);

        if let Some(tx) = &self.teardown_tx {
            let _ = tx.send(self.id.clone());
        }
        info!(session_id = %self.id, host = %self.host, port = self.port, "SSH session closed");
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            state: self.state(),
            size: self.size(),
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs(),
            transcript_path: self.transcript.path().to_path_buf(),
            subscribed: self.has_subscriber(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{MockConnector, MockRemote};
    use crate::session::AuthSecret;

    fn settings(dir: &std::path::Path) -> ConnectionSettings {
        ConnectionSettings {
            log_dir: dir.to_path_buf(),
            poll_interval: Duration::from_millis(2),
            connect_timeout: Duration::from_secs(2),
            ..ConnectionSettings::default()
        }
    }

    fn params() -> ConnectParams {
        ConnectParams::new("box.local", 22, "alice", AuthSecret::Password("pw".into()))
    }

    async fn connected(
        dir: &std::path::Path,
        remote: &MockRemote,
        teardown_tx: Option<mpsc::UnboundedSender<SessionId>>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new("s1".into(), &params(), settings(dir), teardown_tx));
        conn.establish(Arc::new(MockConnector::new(remote.clone())), params())
            .await
            .unwrap();
        conn
    }

    #[tokio::test]
    async fn establish_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let conn = connected(dir.path(), &remote, None).await;
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.size(), TermSize::new(80, 24));

        let failing = Arc::new(Connection::new("s2".into(), &params(), settings(dir.path()), None));
        let err = failing
            .establish(Arc::new(MockConnector::failing("auth rejected")), params())
            .await
            .unwrap_err();
        assert!(matches!(err, WebSshError::ConnectFailed(_)));
        assert_eq!(failing.state(), ConnectionState::Failed);
        assert!(!failing.send("x").await);
    }

    #[tokio::test]
    async fn connect_timeout_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.connect_timeout = Duration::from_millis(50);
        let conn = Arc::new(Connection::new("slow".into(), &params(), s, None));
        let connector = MockConnector::new(MockRemote::new()).with_delay(Duration::from_millis(500));
        let err = conn.establish(Arc::new(connector), params()).await.unwrap_err();
        assert!(matches!(err, WebSshError::ConnectFailed(ref m) if m.contains("timed out")));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn send_and_resize_reach_transport() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let conn = connected(dir.path(), &remote, None).await;

        assert!(conn.send("ls\n").await);
        assert!(conn.resize(120, 40).await);
        assert_eq!(remote.written(), "ls\n");
        assert_eq!(remote.resizes(), vec![TermSize::new(120, 40)]);
        assert_eq!(conn.size(), TermSize::new(120, 40));
        assert_eq!(conn.transcript().pending(), 1);
    }

    #[tokio::test]
    async fn operations_fail_after_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let conn = connected(dir.path(), &remote, None).await;

        conn.disconnect(CloseReason::Requested).await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.close_reason(), Some(CloseReason::Requested));
        assert_eq!(remote.close_calls(), 1);
        for _ in 0..3 {
            assert!(!conn.send("x").await);
            assert!(!conn.resize(100, 30).await);
            assert!(matches!(conn.write("x").await, Err(WebSshError::NotConnected)));
        }
        assert_eq!(remote.written(), "");
    }

    #[tokio::test]
    async fn concurrent_disconnects_tear_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = connected(dir.path(), &remote, Some(tx)).await;

        let mut tasks = Vec::new();
        for reason in [CloseReason::RemoteClosed, CloseReason::Requested, CloseReason::Shutdown] {
            let conn = conn.clone();
            tasks.push(tokio::spawn(async move { conn.disconnect(reason).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(rx.recv().await.as_deref(), Some("s1"));
        assert!(rx.try_recv().is_err());
        assert_eq!(remote.close_calls(), 1);

        conn.disconnect(CloseReason::Requested).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_flushes_transcript_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let conn = connected(dir.path(), &remote, None).await;
        assert!(conn.send("whoami\n").await);
        assert!(!conn.transcript().path().exists());

        conn.disconnect(CloseReason::Requested).await;
        let content = std::fs::read_to_string(conn.transcript().path()).unwrap();
        assert!(content.contains("INPUT: >> whoami"));
        assert!(conn.transcript().path().starts_with(dir.path().join("box.local")));
    }

    #[tokio::test]
    async fn remote_eof_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = connected(dir.path(), &remote, Some(tx)).await;

        remote.push_output(b"bye\r\n");
        remote.hang_up();

        let id = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(id.as_deref(), Some("s1"));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.close_reason(), Some(CloseReason::RemoteClosed));
        let content = std::fs::read_to_string(conn.transcript().path()).unwrap();
        assert!(content.contains("OUTPUT: bye"));
    }

    #[tokio::test]
    async fn subscriber_slot_is_race_checked() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let conn = connected(dir.path(), &remote, None).await;

        let (first, mut first_rx) = conn.attach_subscriber();
        let (second, mut second_rx) = conn.attach_subscriber();
        assert_ne!(first, second);
        // The replaced subscriber's channel is closed.
        assert!(first_rx.recv().await.is_none());

        // A stale detach does not clear the current subscriber.
        assert!(!conn.detach_subscriber(first));
        assert!(conn.has_subscriber());

        remote.push_output(b"hello");
        let chunk = tokio::time::timeout(Duration::from_secs(2), second_rx.recv())
            .await
            .unwrap();
        assert_eq!(chunk.as_deref(), Some("hello"));

        assert!(conn.detach_subscriber(second));
        assert!(!conn.has_subscriber());
        conn.disconnect(CloseReason::Requested).await;
    }

    #[tokio::test]
    async fn info_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connected(dir.path(), &MockRemote::new(), None).await;
        let info = conn.info();
        assert_eq!(info.session_id, "s1");
        assert_eq!(info.username, "alice");
        assert_eq!(info.state, ConnectionState::Connected);
        assert!(!info.subscribed);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "connected");
        conn.disconnect(CloseReason::Requested).await;
    }

    #[tokio::test]
    async fn slow_write_does_not_stall_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        remote.set_write_delay(Duration::from_millis(300));
        let conn = connected(dir.path(), &remote, None).await;

        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        assert!(conn.send("slow\n").await);
        ticker.abort();
        assert!(ticks.load(Ordering::Relaxed) >= 5, "runtime stalled during write");
        assert_eq!(remote.written(), "slow\n");
        conn.disconnect(CloseReason::Requested).await;
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        remote.fail_writes();
        let conn = connected(dir.path(), &remote, None).await;

        assert!(matches!(conn.write("x").await, Err(WebSshError::Timeout)));
        assert!(!conn.send("x").await);
        assert!(conn.is_connected());
        assert_eq!(conn.transcript().pending(), 0);
        conn.disconnect(CloseReason::Requested).await;
    }

    #[tokio::test]
    async fn output_after_teardown_still_reaches_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connected(dir.path(), &MockRemote::new(), None).await;
        conn.disconnect(CloseReason::Requested).await;

        conn.forward_output("late chunk".into()).await;
        for _ in 0..200 {
            if conn.transcript().pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let content = std::fs::read_to_string(conn.transcript().path()).unwrap();
        assert!(content.contains("OUTPUT: late chunk"));
    }
}
