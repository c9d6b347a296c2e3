//! WebSocket listener using tokio-tungstenite.
//!
//! Browsers attach to an existing SSH session at `/ws/ssh/{session_id}`.
//! The path and `Origin` header are checked during the HTTP upgrade, so a
//! rejected client never reaches the bridge.

use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use webssh_core::{encode_server, ServerMessage, SessionId, WebSshError, WebSshResult};

/// Route prefix for terminal bridges.
pub const SESSION_PATH_PREFIX: &str = "/ws/ssh/";

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    /// Session named in the request path.
    pub session_id: SessionId,
}

/// Start the WebSocket listener.
///
/// Returns a receiver that yields accepted connections. An empty
/// `allowed_origins` accepts any origin.
pub async fn start_listener(
    bind_addr: SocketAddr,
    allowed_origins: Vec<String>,
) -> WebSshResult<mpsc::Receiver<WebSocketConnection>> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| WebSshError::Transport(format!("WS bind failed: {e}")))?;

    info!(addr = %bind_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let allowed_origins = Arc::new(allowed_origins);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let allowed_origins = allowed_origins.clone();
                    tokio::spawn(async move {
                        match accept(stream, &allowed_origins).await {
                            Ok((ws_stream, session_id)) => {
                                debug!(remote = %addr, session_id = %session_id, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                    session_id,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

async fn accept(
    stream: TcpStream,
    allowed_origins: &[String],
) -> WebSshResult<(tokio_tungstenite::WebSocketStream<TcpStream>, SessionId)> {
    let mut session_id = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let origin = req.headers().get("origin").and_then(|v| v.to_str().ok());
        if !origin_allowed(origin, allowed_origins) {
            return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
        }
        match parse_session_path(req.uri().path()) {
            Some(id) => {
                session_id = Some(id.to_string());
                Ok(resp)
            }
            None => Err(reject(StatusCode::NOT_FOUND, "not found")),
        }
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| WebSshError::Transport(format!("WS upgrade failed: {e}")))?;
    let session_id = session_id.ok_or_else(|| WebSshError::Transport("missing session id".into()))?;
    Ok((ws_stream, session_id))
}

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(message.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Extract the session ID from `/ws/ssh/{session_id}`.
pub fn parse_session_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix(SESSION_PATH_PREFIX)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

/// Requests without an `Origin` header come from non-browser clients and
/// are accepted.
pub fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    match origin {
        None => true,
        Some(_) if allowed.is_empty() => true,
        Some(origin) => allowed
            .iter()
            .any(|a| a == "*" || a.trim_end_matches('/') == origin.trim_end_matches('/')),
    }
}

/// Helper: send one protocol message as a text frame.
pub async fn ws_send<S>(ws: &mut S, msg: &ServerMessage) -> WebSshResult<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = encode_server(msg)?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| WebSshError::Transport(format!("WS send failed: {e}")))
}
