//! Handshake handling: what a pending connection turns into.
//!
//! Host and join handshakes register a session and move the transport out of
//! pending; ping and poll handshakes are answered once and closed. Every
//! rejection sends a notice and closes before anything is registered.

use super::registry::{ConnState, PendingConnection, Relay};
use crate::auth::RateLimit;
use crate::session::{generate_client_id, ClientSession, ConnId, HostSession};
use bytes::Bytes;
use lanrelay_core::{
    encode, ConnectionType, ErrorCode, ErrorNotice, Handshake, Packet, Pong, PROTOCOL_VERSION,
    RELAY_BRAND,
};
use tracing::{debug, error};

/// Attempts at drawing an unused join code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 20;

/// Which limiter a handshake is counted against.
#[derive(Debug, Clone, Copy)]
enum Limiter {
    World,
    Ping,
}

impl Relay {
    pub(crate) fn handle_handshake(
        &mut self,
        conn: ConnId,
        pending: PendingConnection,
        handshake: Handshake,
    ) {
        if handshake.version != PROTOCOL_VERSION {
            debug!(
                address = %pending.address,
                version = handshake.version,
                supported = PROTOCOL_VERSION,
                "connected with unsupported protocol version"
            );
            let message = if handshake.version < PROTOCOL_VERSION {
                "Outdated Client!"
            } else {
                "Outdated Server!"
            };
            self.fail(conn, ErrorNotice::new(ErrorCode::ProtocolVersion, message));
            return;
        }

        match handshake.kind() {
            Some(ConnectionType::Host) => self.open_host(conn, pending, handshake),
            Some(ConnectionType::Join) => self.open_client(conn, pending, handshake),
            Some(ConnectionType::Ping) => self.answer_ping(conn, pending),
            Some(ConnectionType::PollWorlds) => self.answer_poll(conn, pending),
            None => {
                debug!(
                    address = %pending.address,
                    connection_type = handshake.connection_type,
                    "unknown connection type"
                );
                self.fail(
                    conn,
                    ErrorNotice::new(ErrorCode::UnexpectedPacket, "Unexpected Init Packet"),
                );
            }
        }
    }

    fn open_host(&mut self, conn: ConnId, pending: PendingConnection, handshake: Handshake) {
        if !self.rate_limit(Limiter::World, conn, &pending.address) {
            return;
        }
        let Some(peer) = self.peer(conn) else {
            return;
        };

        // A freshly drawn code that is already taken means the code space is
        // crowded; the host is turned away like one over its world cap.
        let crowded = self.worlds_for(&pending.address).len() >= self.config.worlds_per_ip || {
            let candidate = self.draw_code();
            self.hosts.contains_key(&candidate)
        };
        if crowded {
            debug!(address = %pending.address, "too many worlds are open");
            peer.send_raw(self.canned.too_many_worlds.clone());
            self.handle_close(conn);
            return;
        }

        let mut code = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = self.draw_code();
            if !self.hosts.contains_key(&candidate) {
                code = Some(candidate);
                break;
            }
        }
        let Some(code) = code else {
            error!("relay is running out of join codes");
            error!(address = %pending.address, "closing connection");
            self.fail(conn, ErrorNotice::new(ErrorCode::Internal, "Internal Server Error"));
            return;
        };

        let Some(reply) = self.encode_reply(conn, &pending.address, &handshake, &code) else {
            return;
        };

        debug!(address = %pending.address, code = %code, "connected as a server");
        let host = HostSession::new(
            code.clone(),
            peer.clone(),
            &handshake.code,
            pending.address.clone(),
        );
        self.hosts.insert(code.clone(), host);
        self.worlds_by_address
            .entry(pending.address.clone())
            .or_default()
            .push(code.clone());
        self.set_state(conn, ConnState::Host { code: code.clone() });

        peer.send_raw(reply);
        peer.send(&Packet::IceServers(self.config.ice_servers.clone()));
    }

    fn open_client(&mut self, conn: ConnId, pending: PendingConnection, handshake: Handshake) {
        if !self.rate_limit(Limiter::Ping, conn, &pending.address) {
            return;
        }
        let Some(peer) = self.peer(conn) else {
            return;
        };

        let expected = self.config.join_code.length;
        debug!(address = %pending.address, code = %handshake.code, "connected as a client");
        if handshake.code.chars().count() != expected {
            debug!(code = %handshake.code, "join code has the wrong length");
            self.fail(
                conn,
                ErrorNotice::new(
                    ErrorCode::InvalidCode,
                    format!("The join code is the wrong length, it should be {expected} chars long"),
                ),
            );
            return;
        }

        let code = self.config.join_code.normalize(&handshake.code);
        let Some(host_peer) = self.hosts.get(&code).map(|h| h.peer().clone()) else {
            self.fail(
                conn,
                ErrorNotice::new(ErrorCode::CodeNotFound, "Invalid code, no LAN world found!"),
            );
            return;
        };

        let id = loop {
            let id = generate_client_id();
            if !self.clients.contains_key(&id) {
                break id;
            }
        };

        let Some(reply) = self.encode_reply(conn, &pending.address, &handshake, &id) else {
            return;
        };

        let client = ClientSession::new(
            id.clone(),
            peer.clone(),
            pending.address.clone(),
            code.clone(),
            host_peer,
        );
        peer.send_raw(reply);
        if let Some(host) = self.hosts.get_mut(&code) {
            host.handle_new_client(&client);
        }
        self.clients.insert(id.clone(), client);
        self.set_state(conn, ConnState::Client { id });

        peer.send(&Packet::IceServers(self.config.ice_servers.clone()));
    }

    fn answer_ping(&mut self, conn: ConnId, pending: PendingConnection) {
        if !self.rate_limit(Limiter::Ping, conn, &pending.address) {
            return;
        }
        debug!(address = %pending.address, "pinging the server");
        if let Some(peer) = self.peer(conn) {
            peer.send(&Packet::Pong(Pong {
                protocol: PROTOCOL_VERSION,
                comment: self.config.comment.clone(),
                brand: RELAY_BRAND.to_string(),
            }));
        }
        self.handle_close(conn);
    }

    fn answer_poll(&mut self, conn: ConnId, pending: PendingConnection) {
        if !self.rate_limit(Limiter::Ping, conn, &pending.address) {
            return;
        }
        debug!(address = %pending.address, "polling the server for other worlds");
        let worlds = if self.config.show_local_worlds {
            self.local_worlds(&pending.address)
        } else {
            Vec::new()
        };
        if let Some(peer) = self.peer(conn) {
            peer.send(&Packet::LocalWorlds(worlds));
        }
        self.handle_close(conn);
    }

    /// Encode the handshake echo carrying the assigned code or id. Fails the
    /// connection if it does not fit on the wire.
    fn encode_reply(
        &mut self,
        conn: ConnId,
        address: &str,
        handshake: &Handshake,
        assigned: &str,
    ) -> Option<Bytes> {
        match encode(&handshake.with_code(assigned).into()) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(address = %address, error = %e, "failed to encode handshake reply");
                self.fail(conn, ErrorNotice::new(ErrorCode::Internal, "Internal Server Error"));
                None
            }
        }
    }

    /// Count the request; on a block, send the matching canned notice and
    /// close. Returns whether the handshake may proceed.
    fn rate_limit(&mut self, limiter: Limiter, conn: ConnId, address: &str) -> bool {
        let verdict = match limiter {
            Limiter::World => self.limits.world.limit(address),
            Limiter::Ping => self.limits.ping.limit(address),
        };
        if !verdict.is_blocked() {
            return true;
        }

        if let Some(peer) = self.peer(conn) {
            match verdict {
                RateLimit::Limit => peer.send_raw(self.canned.rate_limited.clone()),
                RateLimit::LimitNowLockout => peer.send_raw(self.canned.locked_out.clone()),
                RateLimit::Locked | RateLimit::None => {}
            }
        }
        self.handle_close(conn);
        false
    }
}
