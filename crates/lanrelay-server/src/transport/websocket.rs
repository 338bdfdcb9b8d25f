//! WebSocket listener using tokio-tungstenite.
//!
//! Origin whitelisting and address extraction happen during the HTTP
//! upgrade, so a connection only reaches the relay once it has been let in
//! and is tagged with the address it is accounted under.

use crate::auth::{request_origin, AddressResolver, OriginPolicy};
use futures_util::{SinkExt, StreamExt};
use lanrelay_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    /// TCP peer address.
    pub remote_addr: SocketAddr,
    /// Effective client address (forwarding header or peer IP).
    pub address: String,
}

/// Bind the listener and start accepting.
///
/// Returns the bound address and a receiver that yields admitted
/// connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    origins: OriginPolicy,
    resolver: AddressResolver,
) -> RelayResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let origins = origins.clone();
                    let resolver = resolver.clone();
                    tokio::spawn(async move {
                        let Some(conn) = upgrade(stream, addr, &origins, &resolver).await else {
                            return;
                        };
                        if tx.send(conn).await.is_err() {
                            warn!("WebSocket connection channel closed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    origins: &OriginPolicy,
    resolver: &AddressResolver,
) -> Option<WebSocketConnection> {
    let mut headers = HeaderMap::new();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        headers = req.headers().clone();
        let origin = request_origin(req.headers());
        if origins.allows(origin.as_deref()) {
            Ok(resp)
        } else {
            debug!(remote = %addr, origin = ?origin, "origin not whitelisted");
            let mut denied = ErrorResponse::new(Some("Origin not allowed".to_string()));
            *denied.status_mut() = StatusCode::FORBIDDEN;
            Err(denied)
        }
    };

    let accepted = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    match accepted {
        Ok(ws_stream) => {
            let address = resolver.resolve(&headers, addr);
            debug!(remote = %addr, address = %address, "WebSocket connection accepted");
            Some(WebSocketConnection {
                ws_stream,
                remote_addr: addr,
                address,
            })
        }
        Err(e) => {
            debug!(remote = %addr, error = %e, "WebSocket handshake failed");
            None
        }
    }
}

/// Helper: send a binary message over a WebSocket.
pub async fn ws_send_binary(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    data: &[u8],
) -> RelayResult<()> {
    ws.send(Message::Binary(data.to_vec().into()))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Maximum frame size for WebSocket messages (1 MiB).
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// Helper: receive the next binary message from a WebSocket.
///
/// Returns `None` if the connection is closed. Text messages are ignored.
/// Rejects frames larger than 1 MiB.
pub async fn ws_recv_binary(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
) -> RelayResult<Option<Vec<u8>>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => {
                if data.len() > MAX_WS_FRAME_SIZE {
                    return Err(RelayError::Transport(format!(
                        "WS frame too large: {} bytes (max {})",
                        data.len(),
                        MAX_WS_FRAME_SIZE
                    )));
                }
                return Ok(Some(data.to_vec()));
            }
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RelayError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}

/// Helper: send a close frame. Errors are irrelevant at this point.
pub async fn ws_close(ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>) {
    let _ = ws.close(None).await;
}
