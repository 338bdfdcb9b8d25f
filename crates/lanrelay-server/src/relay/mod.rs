//! The relay core: connection registry, handshake state machine, dispatch.

mod handshake;
pub mod registry;


pub use registry::Relay;
