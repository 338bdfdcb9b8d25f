//! Host side of a relayed LAN world.

use super::client::ClientSession;
use super::peer::PeerHandle;
use lanrelay_core::{DisconnectNotice, DisconnectReason, ErrorCode, ErrorNotice, Packet, Signal};
use std::collections::HashMap;
use tracing::debug;

/// A connection that registered a world and owns a join code.
#[derive(Debug)]
pub struct HostSession {
    code: String,
    peer: PeerHandle,
    label: String,
    hidden: bool,
    address: String,
    /// Attached clients by id.
    clients: HashMap<String, PeerHandle>,
}

impl HostSession {
    /// `requested_label` is the handshake's code field as the host sent it;
    /// a trailing `;1` hides the world from local discovery, `;0` shows it.
    pub fn new(code: String, peer: PeerHandle, requested_label: &str, address: String) -> Self {
        let (label, hidden) = if let Some(name) = requested_label.strip_suffix(";1") {
            (name, true)
        } else if let Some(name) = requested_label.strip_suffix(";0") {
            (name, false)
        } else {
            (requested_label, false)
        };

        Self {
            code,
            peer,
            label: label.to_string(),
            hidden,
            address,
            clients: HashMap::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn client_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    pub fn has_client(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn send(&self, packet: &Packet) {
        self.peer.send(packet);
    }

    /// Handle a packet sent by the host. Returns `false` if hosts may not
    /// send this packet at all.
    pub fn handle(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::IceCandidate(signal) => {
                self.forward(signal, Packet::IceCandidate);
                true
            }
            Packet::Description(signal) => {
                self.forward(signal, Packet::Description);
                true
            }
            Packet::Disconnect(notice) => {
                self.kick(notice);
                true
            }
            _ => false,
        }
    }

    pub fn handle_new_client(&mut self, client: &ClientSession) {
        self.clients
            .insert(client.id().to_string(), client.peer().clone());
        self.send(&Packet::NewClient {
            client_id: client.id().to_string(),
        });
    }

    pub fn handle_client_disconnect(&mut self, client: &ClientSession) {
        if self.clients.remove(client.id()).is_none() {
            return;
        }
        // A client that reported success or failure already told the host
        // how it ended.
        if !client.is_finished() {
            self.send(
                &DisconnectNotice::new(client.id(), DisconnectReason::Unknown, "End of stream")
                    .into(),
            );
        }
    }

    /// Relay a signal to the client it names, or to every client when the
    /// peer id is empty. The client sees the join code as the peer id.
    fn forward(&self, signal: Signal, wrap: fn(Signal) -> Packet) {
        let relayed = wrap(Signal {
            peer_id: self.code.clone(),
            payload: signal.payload,
        });

        if signal.peer_id.is_empty() {
            for client in self.clients.values() {
                client.send(&relayed);
            }
            return;
        }

        match self.clients.get(&signal.peer_id) {
            Some(client) => client.send(&relayed),
            None => self.unknown_client(&signal.peer_id),
        }
    }

    /// Host asked for one of its clients to be dropped.
    fn kick(&self, notice: DisconnectNotice) {
        match self.clients.get(&notice.client_id) {
            Some(client) => {
                debug!(code = %self.code, client_id = %notice.client_id, "host disconnecting client");
                client.send(&Packet::Disconnect(DisconnectNotice {
                    client_id: String::new(),
                    reason: notice.reason,
                    message: notice.message,
                }));
                client.close();
            }
            None => self.unknown_client(&notice.client_id),
        }
    }

    fn unknown_client(&self, id: &str) {
        debug!(code = %self.code, client_id = %id, "host addressed unknown client");
        self.send(
            &ErrorNotice::new(ErrorCode::UnknownClient, format!("Unknown Client ID: {id}")).into(),
        );
    }
}
