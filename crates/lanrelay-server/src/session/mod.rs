//! Per-peer session objects and the outbound connection handle.

pub mod client;
pub mod host;
pub mod peer;

pub use client::{generate_client_id, ClientSession};
pub use host::HostSession;
pub use peer::{ConnId, Outbound, PeerHandle};
