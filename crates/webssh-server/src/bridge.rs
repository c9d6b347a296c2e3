//! Bridge protocol handler: one message loop per attached browser client.
//!
//! The loop relays `input`/`resize`/`ping` frames to the session and
//! streams pump output back as `output` frames. Leaving the loop only
//! detaches the subscriber; the SSH session outlives any single client.

use crate::session::{ConnectionRegistry, ConnectionState, SessionHandle, SubscriberId};
use crate::transport::websocket::ws_send;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use webssh_core::{decode_client, ClientMessage, ServerMessage, TermSize, WebSshError};

const NOT_CONNECTED: &str = "SSH connection not established";

/// Why a bridge loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeExit {
    /// The session was absent or not connected on entry.
    Rejected,
    /// The client closed its side.
    ClientClosed,
    /// The session left `Connected`; a `disconnected` frame was sent.
    SessionClosed,
    /// Another client attached to the same session.
    Replaced,
    /// Writing to the client or the session failed.
    Failed,
}

/// Serve one client attached to `session_id` until either side goes away.
pub async fn serve<S>(registry: &ConnectionRegistry, session_id: &str, mut ws: S) -> BridgeExit
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let Some(conn) = registry.get(session_id) else {
        warn!(session_id, "bridge requested for unknown session");
        reject(&mut ws, format!("SSH session {session_id} not found")).await;
        return BridgeExit::Rejected;
    };
    if !conn.is_connected() {
        reject(&mut ws, NOT_CONNECTED.to_string()).await;
        return BridgeExit::Rejected;
    }

    // Subscribe to state before attaching so a close in between is not missed.
    let state_rx = conn.watch_state();
    let (subscriber, output_rx) = conn.attach_subscriber();
    if !conn.is_connected() {
        conn.detach_subscriber(subscriber);
        reject(&mut ws, NOT_CONNECTED.to_string()).await;
        return BridgeExit::Rejected;
    }

    info!(session_id, subscriber, "bridge attached");
    let exit = match ws_send(&mut ws, &ServerMessage::Connected).await {
        Ok(()) => run_loop(&conn, &mut ws, output_rx, state_rx).await,
        Err(e) => {
            debug!(session_id, error = %e, "client went away before attach completed");
            BridgeExit::Failed
        }
    };

    detach(&conn, subscriber);
    if exit != BridgeExit::ClientClosed {
        let _ = ws.close().await;
    }
    info!(session_id, exit = ?exit, "bridge detached");
    exit
}

async fn run_loop<S>(
    conn: &SessionHandle,
    ws: &mut S,
    mut output_rx: mpsc::Receiver<String>,
    mut state_rx: watch::Receiver<ConnectionState>,
) -> BridgeExit
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let session_id = conn.id().as_str();
    loop {
        tokio::select! {
            output = output_rx.recv() => {
                let Some(data) = output else {
                    info!(session_id, "bridge replaced by a newer client");
                    return BridgeExit::Replaced;
                };
                if let Err(e) = ws_send(ws, &ServerMessage::output(data)).await {
                    debug!(session_id, error = %e, "output send failed");
                    return BridgeExit::Failed;
                }
            }

            changed = state_rx.changed() => {
                if changed.is_ok() && conn.is_connected() {
                    continue;
                }
                // Deliver output the pump forwarded before teardown.
                while let Ok(data) = output_rx.try_recv() {
                    if ws_send(ws, &ServerMessage::output(data)).await.is_err() {
                        return BridgeExit::Failed;
                    }
                }
                let reason = conn
                    .close_reason()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "session closed".to_string());
                let _ = ws_send(ws, &ServerMessage::disconnected(reason)).await;
                return BridgeExit::SessionClosed;
            }

            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(exit) = dispatch(conn, ws, &text).await {
                            return exit;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(session_id, len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => return BridgeExit::ClientClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "WebSocket receive failed");
                        return BridgeExit::Failed;
                    }
                }
            }
        }
    }
}

/// Handle one text frame. Returns `Some` when the loop must end.
async fn dispatch<S>(conn: &SessionHandle, ws: &mut S, text: &str) -> Option<BridgeExit>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let session_id = conn.id().as_str();
    let msg = match decode_client(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id, error = %e, "malformed bridge frame");
            return None;
        }
    };

    match msg {
        ClientMessage::Input { data } => {
            if let Err(e) = conn.write(&data).await {
                warn!(session_id, error = %e, "failed to send input");
                let _ = ws_send(ws, &ServerMessage::error(format!("failed to send input: {e}"))).await;
                return Some(BridgeExit::Failed);
            }
        }
        ClientMessage::Resize { cols, rows } => {
            let size = TermSize::new(cols, rows);
            if !size.is_valid() {
                let e = WebSshError::ProtocolError(format!("resize out of range: {size}"));
                warn!(session_id, error = %e, "ignoring resize");
            } else if !conn.resize(cols, rows).await {
                warn!(session_id, size = %size, "resize failed");
            }
        }
        ClientMessage::Ping => {
            if ws_send(ws, &ServerMessage::Pong).await.is_err() {
                return Some(BridgeExit::Failed);
            }
        }
        ClientMessage::Unknown => {
            warn!(session_id, frame = text, "unknown bridge message type");
        }
    }
    None
}

async fn reject<S>(ws: &mut S, message: String)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let _ = ws_send(ws, &ServerMessage::error(message)).await;
    let _ = ws.close().await;
}

fn detach(conn: &SessionHandle, subscriber: SubscriberId) {
    if !conn.detach_subscriber(subscriber) {
        debug!(session_id = %conn.id(), subscriber, "subscriber slot already taken over");
    }
}
