//! lanrelay-core: shared protocol library for the LAN world relay.
//!
//! Provides the relay packet types, the opcode registry and binary codec,
//! and the error type shared by the server.

pub mod codec;
pub mod error;
pub mod packet;

// Re-export commonly used items at crate root.
pub use codec::{decode, encode, CannedNotices, PacketRegistry};
pub use error::{RelayError, RelayResult};
pub use packet::{
    ConnectionType, DisconnectNotice, DisconnectReason, ErrorCode, ErrorNotice, Handshake,
    IceServer, LocalWorld, Packet, Pong, Signal, PROTOCOL_VERSION, RELAY_BRAND,
};
