//! Core server: accepts WebSocket connections and feeds them to the relay.
//!
//! The relay sits behind a single lock. Each connection task turns socket
//! activity into `accept` / `handle_frame` / `handle_close` calls and drains
//! the connection's outbound queue back into the socket.

use crate::auth::{AddressResolver, OriginPolicy};
use crate::config::RelayConfig;
use crate::relay::Relay;
use crate::session::{ConnId, Outbound, PeerHandle};
use crate::transport::websocket::{self, WebSocketConnection};
use lanrelay_core::RelayResult;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// How often expired rate-limit windows and lockouts are purged.
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The relay server instance.
pub struct RelayServer {
    listen: SocketAddr,
    pending_timeout: Option<Duration>,
    origins: OriginPolicy,
    resolver: AddressResolver,
    relay: Arc<Mutex<Relay>>,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        let listen = config.listen;
        let pending_timeout = config.pending_timeout;
        let origins = OriginPolicy::from_config(&config);
        let resolver = AddressResolver::from_config(&config);
        let relay = Relay::new(config)?;

        Ok(Self {
            listen,
            pending_timeout,
            origins,
            resolver,
            relay: Arc::new(Mutex::new(relay)),
            next_conn_id: AtomicU64::new(1),
        })
    }

    #[cfg(test)]
    pub fn relay(&self) -> &Arc<Mutex<Relay>> {
        &self.relay
    }

    /// Bind the configured address and serve until the listener goes away.
    pub async fn run(self) -> RelayResult<()> {
        let server = Arc::new(self);
        let (_, ws_rx) = server.bind().await?;
        server.serve(ws_rx).await
    }

    /// Start the WebSocket listener. Returns the bound address.
    pub async fn bind(&self) -> RelayResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
        websocket::start_listener(self.listen, self.origins.clone(), self.resolver.clone()).await
    }

    /// Run the maintenance task and hand every admitted connection its own task.
    pub async fn serve(
        self: Arc<Self>,
        mut ws_rx: mpsc::Receiver<WebSocketConnection>,
    ) -> RelayResult<()> {
        let sweep_relay = self.relay.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sweep_relay.lock().await.sweep_rate_limits();
            }
        });

        info!(
            listen = %self.listen,
            pending_timeout = ?self.pending_timeout,
            "lanrelay-server ready"
        );

        while let Some(ws_conn) = ws_rx.recv().await {
            let srv = self.clone();
            tokio::spawn(async move {
                if let Err(e) = srv.handle_websocket(ws_conn).await {
                    debug!(error = %e, "WebSocket connection error");
                }
            });
        }

        info!("listener closed, shutting down");
        Ok(())
    }

    async fn handle_websocket(&self, mut conn: WebSocketConnection) -> RelayResult<()> {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (peer, mut outbound) = PeerHandle::channel(id);
        debug!(conn = id, remote = %conn.remote_addr, "handling WebSocket connection");

        self.relay.lock().await.accept(peer, conn.address.clone());
        let result = self.connection_loop(id, &mut conn, &mut outbound).await;
        self.relay.lock().await.handle_close(id);
        websocket::ws_close(&mut conn.ws_stream).await;
        result
    }

    /// Pump one connection until either side is done with it.
    async fn connection_loop(
        &self,
        id: ConnId,
        conn: &mut WebSocketConnection,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> RelayResult<()> {
        let deadline = tokio::time::sleep(self.pending_timeout.unwrap_or_default());
        tokio::pin!(deadline);
        let mut awaiting_handshake = self.pending_timeout.is_some();

        loop {
            tokio::select! {
                biased;

                item = outbound.recv() => match item {
                    Some(Outbound::Frame(frame)) => {
                        websocket::ws_send_binary(&mut conn.ws_stream, &frame).await?;
                    }
                    Some(Outbound::Close) | None => return Ok(()),
                },

                _ = &mut deadline, if awaiting_handshake => {
                    awaiting_handshake = false;
                    self.relay.lock().await.expire_pending(id);
                }

                frame = websocket::ws_recv_binary(&mut conn.ws_stream) => match frame? {
                    Some(data) => {
                        let mut relay = self.relay.lock().await;
                        relay.handle_frame(id, &data);
                        if awaiting_handshake && !relay.is_pending(id) {
                            awaiting_handshake = false;
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}
