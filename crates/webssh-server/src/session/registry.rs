//! Connection registry: the single authority for session identity.
//!
//! Create, remove and bulk shutdown are linearized on one table lock. The
//! lock is never held across an await: `create` reserves a slot (counted
//! against capacity) before the handshake and converts it into a live entry
//! afterwards, so a slow connect never stalls lookups or other creates.

use super::connection::{CloseReason, Connection, ConnectionSettings, SessionInfo};
use super::params::ConnectParams;
use super::transport::Connector;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webssh_core::{SessionId, WebSshError, WebSshResult};

/// Handle to a live session: exposes `is_connected`, `send` and `resize`.
pub type SessionHandle = Arc<Connection>;

#[derive(Default)]
struct Table {
    live: HashMap<SessionId, SessionHandle>,
    /// IDs whose connection is being established.
    pending: HashSet<SessionId>,
    /// Set by `shutdown_all`; no session may be committed afterwards.
    shutting_down: bool,
}

impl Table {
    fn occupied(&self) -> usize {
        self.live.len() + self.pending.len()
    }

    /// Drop entries whose connection already finished teardown.
    fn purge_closed(&mut self) {
        self.live.retain(|_, conn| !conn.is_terminal());
    }
}

/// Releases a pending reservation, including when `create` is cancelled.
struct Reservation<'a> {
    registry: &'a ConnectionRegistry,
    id: Option<SessionId>,
}

impl Reservation<'_> {
    /// Turn the reservation into a live entry. `table` must be the
    /// registry's locked table.
    fn commit(mut self, table: &mut Table, conn: SessionHandle) {
        if let Some(id) = self.id.take() {
            table.pending.remove(&id);
            table.live.insert(id, conn);
        }
    }

    fn release(mut self, table: &mut Table) {
        if let Some(id) = self.id.take() {
            table.pending.remove(&id);
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.table().pending.remove(&id);
        }
    }
}

/// Owns every live [`Connection`].
pub struct ConnectionRegistry {
    table: Mutex<Table>,
    max_sessions: usize,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    teardown_tx: mpsc::UnboundedSender<SessionId>,
    teardown_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionId>>>,
}

impl ConnectionRegistry {
    pub fn new(max_sessions: usize, settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
        Self {
            table: Mutex::new(Table::default()),
            max_sessions,
            settings,
            connector,
            teardown_tx,
            teardown_rx: Mutex::new(Some(teardown_rx)),
        }
    }

    /// Establish a new session under `session_id`.
    ///
    /// Fails with `AlreadyExists` if the ID is live or being created,
    /// `CapacityExceeded` at the configured maximum, or the connection's
    /// `ConnectFailed`. Nothing is inserted on failure.
    pub async fn create(&self, session_id: SessionId, params: ConnectParams) -> WebSshResult<SessionHandle> {
        let reservation = {
            let mut table = self.table();
            if table.shutting_down {
                return Err(shutting_down());
            }
            table.purge_closed();
            if table.live.contains_key(&session_id) || table.pending.contains(&session_id) {
                return Err(WebSshError::AlreadyExists(session_id));
            }
            if table.occupied() >= self.max_sessions {
                warn!(max = self.max_sessions, "session capacity reached");
                return Err(WebSshError::CapacityExceeded {
                    max: self.max_sessions,
                });
            }
            table.pending.insert(session_id.clone());
            Reservation {
                registry: self,
                id: Some(session_id.clone()),
            }
        };

        let target = params.target();
        let conn = Arc::new(Connection::new(
            session_id.clone(),
            &params,
            self.settings.clone(),
            Some(self.teardown_tx.clone()),
        ));
        conn.establish(self.connector.clone(), params).await?;

        let active = {
            let mut table = self.table();
            if table.shutting_down {
                reservation.release(&mut table);
                None
            } else if conn.is_terminal() {
                reservation.release(&mut table);
                return Err(WebSshError::RemoteClosed);
            } else {
                reservation.commit(&mut table, conn.clone());
                Some(table.live.len())
            }
        };

        let Some(active) = active else {
            info!(session_id = %session_id, "shutdown started during connect, closing new session");
            conn.disconnect(CloseReason::Shutdown).await;
            return Err(shutting_down());
        };
        info!(session_id = %session_id, target_host = %target, active, "SSH session created");
        Ok(conn)
    }

    /// Detach and tear down a session. Returns `false` if the ID is unknown.
    /// On `true`, the transport has been released and the transcript flushed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let conn = self.table().live.remove(session_id);
        match conn {
            Some(conn) => {
                conn.disconnect(CloseReason::Requested).await;
                info!(session_id, "SSH session removed");
                true
            }
            None => false,
        }
    }

    /// Look up a live session.
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.table()
            .live
            .get(session_id)
            .filter(|conn| !conn.is_terminal())
            .cloned()
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.table().live.values().filter(|c| !c.is_terminal()).count()
    }

    pub fn list_active(&self) -> HashSet<SessionId> {
        self.table()
            .live
            .iter()
            .filter(|(_, conn)| !conn.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn list_info(&self) -> Vec<SessionInfo> {
        let conns: Vec<SessionHandle> = self.table().live.values().cloned().collect();
        conns.iter().map(|c| c.info()).collect()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Tear down every session. Used once, at process shutdown. A teardown
    /// that fails or panics is logged and the rest still proceed. Creates
    /// still connecting close their session instead of committing it.
    pub async fn shutdown_all(&self) {
        let conns: Vec<SessionHandle> = {
            let mut table = self.table();
            table.shutting_down = true;
            table.live.drain().map(|(_, c)| c).collect()
        };
        if conns.is_empty() {
            return;
        }
        info!(count = conns.len(), "disconnecting all SSH sessions");

        let tasks: Vec<(SessionId, JoinHandle<()>)> = conns
            .into_iter()
            .map(|conn| {
                let id = conn.id().clone();
                (id, tokio::spawn(async move { conn.disconnect(CloseReason::Shutdown).await }))
            })
            .collect();
        for (id, task) in tasks {
            if let Err(e) = task.await {
                warn!(session_id = %id, error = %e, "session teardown failed");
            }
        }
        info!("all SSH sessions disconnected");
    }

    /// Remove detached sessions idle for longer than `max_idle`.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let expired: Vec<SessionHandle> = {
            let mut table = self.table();
            let ids: Vec<SessionId> = table
                .live
                .iter()
                .filter(|(_, c)| !c.has_subscriber() && c.idle_for() > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| table.live.remove(id)).collect()
        };

        let mut removed = Vec::with_capacity(expired.len());
        for conn in expired {
            warn!(session_id = %conn.id(), idle_secs = conn.idle_for().as_secs(), "session expired (idle)");
            conn.disconnect(CloseReason::IdleTimeout).await;
            removed.push(conn.id().clone());
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "idle reaper removed sessions");
        }
        removed
    }

    /// Start the task that drops entries for sessions that tore themselves
    /// down (remote EOF, read error). Only the first call starts a task.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let rx = self
            .teardown_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(tokio::spawn(run_reaper(Arc::downgrade(self), rx)))
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget_closed(&self, session_id: &str) {
        let mut table = self.table();
        let closed = table
            .live
            .get(session_id)
            .is_some_and(|conn| conn.is_terminal());
        if closed {
            table.live.remove(session_id);
            info!(session_id, active = table.live.len(), "closed SSH session removed from registry");
        }
    }
}

fn shutting_down() -> WebSshError {
    WebSshError::Other("registry is shutting down".into())
}

async fn run_reaper(registry: Weak<ConnectionRegistry>, mut rx: mpsc::UnboundedReceiver<SessionId>) {
    while let Some(session_id) = rx.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.forget_closed(&session_id);
    }
    debug!("registry reaper stopped");
}
