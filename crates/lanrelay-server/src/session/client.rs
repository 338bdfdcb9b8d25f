//! Joining side of a relayed LAN world.

use super::peer::PeerHandle;
use lanrelay_core::{DisconnectNotice, DisconnectReason, Packet, Signal};
use rand::Rng;

/// How far signaling with the host has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Negotiating,
    Succeeded,
    Failed,
}

/// A connection that joined a host by its code.
#[derive(Debug)]
pub struct ClientSession {
    id: String,
    peer: PeerHandle,
    address: String,
    host_code: String,
    host: PeerHandle,
    state: ClientState,
}

impl ClientSession {
    pub fn new(
        id: String,
        peer: PeerHandle,
        address: String,
        host_code: String,
        host: PeerHandle,
    ) -> Self {
        Self {
            id,
            peer,
            address,
            host_code,
            host,
            state: ClientState::Negotiating,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Join code of the host this client is bound to.
    pub fn host_code(&self) -> &str {
        &self.host_code
    }

    #[cfg(test)]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether the client reported the outcome of its peer connection.
    pub fn is_finished(&self) -> bool {
        self.state != ClientState::Negotiating
    }

    pub fn send(&self, packet: &Packet) {
        self.peer.send(packet);
    }

    /// Handle a packet sent by the client. Returns `false` if it is not
    /// legal for a client in its current state.
    pub fn handle(&mut self, packet: Packet) -> bool {
        if self.is_finished() {
            return false;
        }

        match packet {
            Packet::IceCandidate(signal) => {
                self.host.send(&Packet::IceCandidate(self.tag(signal)));
                true
            }
            Packet::Description(signal) => {
                self.host.send(&Packet::Description(self.tag(signal)));
                true
            }
            Packet::ClientSuccess { .. } => {
                self.host.send(&Packet::ClientSuccess {
                    client_id: self.id.clone(),
                });
                self.finish(
                    ClientState::Succeeded,
                    DisconnectReason::FinishedSuccess,
                    "Successful connection",
                );
                true
            }
            Packet::ClientFailure { .. } => {
                self.host.send(&Packet::ClientFailure {
                    client_id: self.id.clone(),
                });
                self.finish(
                    ClientState::Failed,
                    DisconnectReason::FinishedFailed,
                    "Failed connection",
                );
                true
            }
            _ => false,
        }
    }

    /// The host only ever sees this client's own id as the peer id.
    fn tag(&self, signal: Signal) -> Signal {
        Signal {
            peer_id: self.id.clone(),
            payload: signal.payload,
        }
    }

    /// Signaling is over either way: tell the client and hang up.
    fn finish(&mut self, state: ClientState, reason: DisconnectReason, message: &str) {
        self.state = state;
        self.send(&DisconnectNotice::new("", reason, message).into());
        self.peer.close();
    }
}

/// Fresh random client id (16 lowercase hex chars).
pub fn generate_client_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    hex::encode(bytes)
}
