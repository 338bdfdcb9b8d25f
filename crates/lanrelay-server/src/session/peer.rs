//! Outbound half of a relay connection.
//!
//! The relay never touches sockets. Everything it wants written (or closed)
//! is pushed onto the connection's queue and drained by that connection's
//! writer task.

use bytes::Bytes;
use lanrelay_core::{encode, Packet};
use tokio::sync::mpsc;
use tracing::warn;

/// Identifies one accepted transport connection.
pub type ConnId = u64;

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One complete encoded packet.
    Frame(Bytes),
    /// Close the transport after flushing earlier frames.
    Close,
}

/// Cheap, cloneable handle for writing to one connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    pub fn new(id: ConnId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// A handle plus the receiving end its writer task drains.
    pub fn channel(id: ConnId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Encode and queue a packet.
    pub fn send(&self, packet: &Packet) {
        match encode(packet) {
            Ok(frame) => self.send_raw(frame),
            Err(e) => warn!(conn = self.id, packet = packet.name(), error = %e, "dropping unencodable packet"),
        }
    }

    /// Queue an already-encoded frame.
    pub fn send_raw(&self, frame: Bytes) {
        // A closed queue means the connection is already gone.
        let _ = self.tx.send(Outbound::Frame(frame));
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}
