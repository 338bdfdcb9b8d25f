//! Connection registry: every live transport and the world/client tables.
//!
//! The relay is a plain synchronous state machine. Each connection event
//! (accept, frame, close) is one method call that runs to completion, so
//! callers serialize access (one lock around the whole relay) and no two
//! mutations ever interleave. All output goes through [`PeerHandle`]s.

use crate::auth::RelayRateLimits;
use crate::config::{JoinCodePolicy, RelayConfig};
use crate::session::{ClientSession, ConnId, HostSession, PeerHandle};
use lanrelay_core::{
    decode, CannedNotices, DisconnectNotice, DisconnectReason, ErrorCode, ErrorNotice,
    LocalWorld, Packet, RelayError, RelayResult,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error};

/// A transport that has not completed its handshake.
#[derive(Debug, Clone)]
pub struct PendingConnection {
    pub opened_at: Instant,
    pub address: String,
}

/// Where a transport is in its lifecycle. Closed transports have no entry.
#[derive(Debug, Clone)]
pub enum ConnState {
    Pending(PendingConnection),
    Host { code: String },
    Client { id: String },
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) peer: PeerHandle,
    pub(crate) state: ConnState,
}

/// Draws candidate join codes.
pub(crate) type CodeSource = Box<dyn FnMut(&JoinCodePolicy) -> String + Send>;

/// The relay: owns all registries and drives every connection's state.
pub struct Relay {
    pub(crate) config: RelayConfig,
    pub(crate) connections: HashMap<ConnId, Connection>,
    /// Live worlds by join code.
    pub(crate) hosts: HashMap<String, HostSession>,
    /// Live clients by id.
    pub(crate) clients: HashMap<String, ClientSession>,
    /// Join codes owned by each address, in registration order.
    pub(crate) worlds_by_address: HashMap<String, Vec<String>>,
    pub(crate) limits: RelayRateLimits,
    pub(crate) canned: CannedNotices,
    pub(crate) code_source: CodeSource,
}

impl Relay {
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        let limits = RelayRateLimits::new(
            config.world_ratelimit.clone(),
            config.ping_ratelimit.clone(),
        );
        Ok(Self {
            config,
            connections: HashMap::new(),
            hosts: HashMap::new(),
            clients: HashMap::new(),
            worlds_by_address: HashMap::new(),
            limits,
            canned: CannedNotices::encode()?,
            code_source: Box::new(JoinCodePolicy::generate),
        })
    }

    #[cfg(test)]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Replace the join code generator.
    #[cfg(test)]
    pub(crate) fn set_code_source(
        &mut self,
        source: impl FnMut(&JoinCodePolicy) -> String + Send + 'static,
    ) {
        self.code_source = Box::new(source);
    }

    /// Register a freshly accepted transport as pending.
    pub fn accept(&mut self, peer: PeerHandle, address: String) {
        debug!(conn = peer.id(), address = %address, "connection opened");
        let state = ConnState::Pending(PendingConnection {
            opened_at: Instant::now(),
            address,
        });
        self.connections.insert(peer.id(), Connection { peer, state });
    }

    /// Process one inbound frame.
    pub fn handle_frame(&mut self, conn: ConnId, frame: &[u8]) {
        let Some(entry) = self.connections.get(&conn) else {
            debug!(conn, "frame for closed connection ignored");
            return;
        };

        match entry.state.clone() {
            ConnState::Pending(pending) => match decode(frame) {
                Ok(Packet::Handshake(handshake)) => {
                    self.handle_handshake(conn, pending, handshake);
                }
                Ok(other) => {
                    debug!(
                        address = %pending.address,
                        packet = other.name(),
                        "pending connection did not open with a handshake"
                    );
                    self.fail(conn, ErrorNotice::new(ErrorCode::UnexpectedPacket, "Unexpected Init Packet"));
                }
                Err(e) => {
                    debug!(address = %pending.address, error = %e, "undecodable init packet");
                    self.fail(conn, ErrorNotice::new(ErrorCode::UnexpectedPacket, "Unexpected Init Packet"));
                }
            },
            ConnState::Host { code } => match decode(frame) {
                Ok(packet) => {
                    let name = packet.name();
                    let Some(host) = self.hosts.get_mut(&code) else {
                        self.missing_session(conn);
                        return;
                    };
                    if !host.handle(packet) {
                        debug!(code = %code, packet = name, "host sent invalid packet");
                        self.fail(conn, ErrorNotice::new(ErrorCode::InvalidPacket, "Invalid Packet Received"));
                    }
                }
                Err(e) => self.session_decode_failure(conn, e),
            },
            ConnState::Client { id } => match decode(frame) {
                Ok(packet) => {
                    let name = packet.name();
                    let Some(client) = self.clients.get_mut(&id) else {
                        self.missing_session(conn);
                        return;
                    };
                    if !client.handle(packet) {
                        debug!(client_id = %id, packet = name, "client sent invalid packet");
                        self.fail(conn, ErrorNotice::new(ErrorCode::InvalidPacket, "Invalid Packet Received"));
                    }
                }
                Err(e) => self.session_decode_failure(conn, e),
            },
        }
    }

    /// The transport went away (or the relay is done with it). Idempotent.
    pub fn handle_close(&mut self, conn: ConnId) {
        let Some(entry) = self.connections.remove(&conn) else {
            return;
        };
        entry.peer.close();

        match entry.state {
            ConnState::Pending(pending) => {
                debug!(address = %pending.address, "connection closed");
            }
            ConnState::Host { code } => self.remove_host(&code),
            ConnState::Client { id } => {
                if let Some(client) = self.clients.remove(&id) {
                    debug!(address = %client.address(), client_id = %id, "client closed");
                    if let Some(host) = self.hosts.get_mut(client.host_code()) {
                        host.handle_client_disconnect(&client);
                    }
                }
            }
        }
    }

    /// Drop a connection that never completed its handshake in time.
    pub fn expire_pending(&mut self, conn: ConnId) {
        let Some(entry) = self.connections.get(&conn) else {
            return;
        };
        if let ConnState::Pending(pending) = &entry.state {
            debug!(
                address = %pending.address,
                open_for = ?pending.opened_at.elapsed(),
                "pending connection timed out"
            );
            entry.peer.send(
                &DisconnectNotice::new("", DisconnectReason::Timeout, "Handshake timed out").into(),
            );
            self.handle_close(conn);
        }
    }

    /// Periodic limiter maintenance. Touches limiter state only.
    pub fn sweep_rate_limits(&mut self) {
        self.limits.gc();
    }

    pub fn is_pending(&self, conn: ConnId) -> bool {
        matches!(
            self.connections.get(&conn).map(|c| &c.state),
            Some(ConnState::Pending(_))
        )
    }

    #[cfg(test)]
    pub fn state(&self, conn: ConnId) -> Option<&ConnState> {
        self.connections.get(&conn).map(|c| &c.state)
    }

    #[cfg(test)]
    pub fn host(&self, code: &str) -> Option<&HostSession> {
        self.hosts.get(code)
    }

    #[cfg(test)]
    pub fn client(&self, id: &str) -> Option<&ClientSession> {
        self.clients.get(id)
    }

    #[cfg(test)]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Join codes registered from `address`.
    pub fn worlds_for(&self, address: &str) -> &[String] {
        self.worlds_by_address
            .get(address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Visible worlds hosted from `address`, for local discovery.
    pub fn local_worlds(&self, address: &str) -> Vec<LocalWorld> {
        self.worlds_for(address)
            .iter()
            .filter_map(|code| self.hosts.get(code))
            .filter(|host| !host.is_hidden())
            .take(u8::MAX as usize)
            .map(|host| LocalWorld {
                name: host.label().to_string(),
                code: host.code().to_string(),
            })
            .collect()
    }

    pub(crate) fn draw_code(&mut self) -> String {
        (self.code_source)(&self.config.join_code)
    }

    pub(crate) fn peer(&self, conn: ConnId) -> Option<PeerHandle> {
        self.connections.get(&conn).map(|c| c.peer.clone())
    }

    pub(crate) fn set_state(&mut self, conn: ConnId, state: ConnState) {
        if let Some(entry) = self.connections.get_mut(&conn) {
            entry.state = state;
        }
    }

    /// Send a notice and close.
    pub(crate) fn fail(&mut self, conn: ConnId, notice: ErrorNotice) {
        if let Some(peer) = self.peer(conn) {
            peer.send(&notice.into());
        }
        self.handle_close(conn);
    }

    fn missing_session(&mut self, conn: ConnId) {
        debug!(conn, "connection has no host or client attached to it");
        self.fail(conn, ErrorNotice::new(ErrorCode::UnexpectedPacket, "Internal Server Error"));
    }

    /// A frame from an established peer failed to decode.
    fn session_decode_failure(&mut self, conn: ConnId, e: RelayError) {
        error!(conn, error = %e, "failed to handle binary frame");
        if self.config.close_on_session_error {
            self.fail(conn, ErrorNotice::new(ErrorCode::InvalidPacket, "Invalid Packet Received"));
        }
    }

    /// Unregister a world and drop every client attached to it.
    fn remove_host(&mut self, code: &str) {
        let Some(host) = self.hosts.remove(code) else {
            return;
        };
        debug!(address = %host.address(), code = %code, "server closed");

        if let Some(codes) = self.worlds_by_address.get_mut(host.address()) {
            codes.retain(|c| c != code);
            if codes.is_empty() {
                self.worlds_by_address.remove(host.address());
            }
        }

        for client_id in host.client_ids() {
            if let Some(client) = self.clients.remove(client_id) {
                debug!(address = %client.address(), client_id = %client_id, "disconnecting client");
                self.connections.remove(&client.peer().id());
                client.peer().close();
            }
        }
    }
}
