//! Output pump: one background task per connected session.
//!
//! Drains available output from the transport, transcribes it and forwards
//! it to the current subscriber. On remote EOF or a read error it tears the
//! connection down once and stops. Empty polls sleep for the configured
//! interval.

use super::connection::{CloseReason, Connection};
use super::transport::ReadOutcome;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webssh_core::{OutputDecoder, WebSshError};

/// Start the pump for a connection that has just become `Connected`.
pub fn spawn(conn: Arc<Connection>) -> JoinHandle<()> {
    tokio::spawn(run(conn))
}

async fn run(conn: Arc<Connection>) {
    let interval = conn.settings().poll_interval;
    let mut buf = vec![0u8; conn.settings().read_chunk.max(1)];
    let mut decoder = OutputDecoder::new();
    debug!(session_id = %conn.id(), "output pump started");

    while conn.is_connected() {
        match conn.poll_output(&mut buf) {
            Ok(ReadOutcome::Data(n)) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    conn.forward_output(text).await;
                }
                // Keep draining, but let other sessions run.
                tokio::task::yield_now().await;
            }
            Ok(ReadOutcome::Idle) => tokio::time::sleep(interval).await,
            Ok(ReadOutcome::Closed) => {
                let tail = decoder.finish();
                if !tail.is_empty() {
                    conn.forward_output(tail).await;
                }
                info!(session_id = %conn.id(), "SSH channel closed by server");
                conn.disconnect(CloseReason::RemoteClosed).await;
                break;
            }
            // Teardown already took the transport.
            Err(WebSshError::NotConnected) => break,
            Err(e) => {
                warn!(session_id = %conn.id(), error = %e, "error in read loop");
                conn.disconnect(CloseReason::ReadError(e.to_string())).await;
                break;
            }
        }
    }

    debug!(session_id = %conn.id(), "output pump stopped");
}
