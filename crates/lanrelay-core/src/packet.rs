//! Relay packet types.
//!
//! Every frame on the wire is one packet: a single opcode byte followed by the
//! variant's fields. Signaling payloads (ICE candidates, session descriptions)
//! are carried as opaque strings and never interpreted by the relay.

/// Relay protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Brand string reported in [`Pong`] replies.
pub const RELAY_BRAND: &str = concat!("lanrelay/", env!("CARGO_PKG_VERSION"));

/// Opcode bytes, one per packet variant.
pub mod opcode {
    pub const HANDSHAKE: u8 = 0x00;
    pub const ICE_SERVERS: u8 = 0x01;
    pub const NEW_CLIENT: u8 = 0x02;
    pub const ICE_CANDIDATE: u8 = 0x03;
    pub const DESCRIPTION: u8 = 0x04;
    pub const CLIENT_SUCCESS: u8 = 0x05;
    pub const CLIENT_FAILURE: u8 = 0x06;
    pub const LOCAL_WORLDS: u8 = 0x07;
    pub const PONG: u8 = 0x69;
    pub const DISCONNECT: u8 = 0xFE;
    pub const ERROR: u8 = 0xFF;
}

/// What a connection declares itself to be in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionType {
    Host = 1,
    Join = 2,
    Ping = 3,
    PollWorlds = 4,
}

impl ConnectionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Host),
            2 => Some(Self::Join),
            3 => Some(Self::Ping),
            4 => Some(Self::PollWorlds),
            _ => None,
        }
    }
}

/// The mandatory first packet on every connection.
///
/// `code` is the request value on the way in (the host's world label, or the
/// join code a client wants) and the assigned join code or client id on the
/// way out. Responses are built with [`Handshake::with_code`] so the version
/// and type bytes always echo the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u8,
    /// Raw connection type byte; unknown values survive decoding so the
    /// relay can reject them explicitly.
    pub connection_type: u8,
    pub code: String,
}

impl Handshake {
    pub fn new(connection_type: ConnectionType, code: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            connection_type: connection_type as u8,
            code: code.into(),
        }
    }

    /// The declared connection type, if it is one the relay knows.
    pub fn kind(&self) -> Option<ConnectionType> {
        ConnectionType::from_u8(self.connection_type)
    }

    /// Response handshake carrying `code`, keeping version and type intact.
    pub fn with_code(&self, code: impl Into<String>) -> Self {
        Self {
            version: self.version,
            connection_type: self.connection_type,
            code: code.into(),
        }
    }
}

/// Whether an ICE server needs credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Plain STUN server, no credentials on the wire.
    None,
    /// TURN-style server with username and password.
    Password,
}

impl CredentialKind {
    pub(crate) fn wire_tag(self) -> u8 {
        match self {
            CredentialKind::None => b'S',
            CredentialKind::Password => b'T',
        }
    }
}

/// One NAT traversal server handed to peers after their handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub address: String,
    pub kind: CredentialKind,
    /// Type tag as configured (`stun`, `turn`, ...). Not sent on the wire.
    pub type_tag: String,
    pub username: String,
    pub password: String,
}

impl IceServer {
    pub fn stun(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind: CredentialKind::None,
            type_tag: "stun".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }

    pub fn turn(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            kind: CredentialKind::Password,
            type_tag: "turn".to_string(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A discoverable world hosted from the same address as the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWorld {
    pub name: String,
    pub code: String,
}

/// Reply to a ping handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub protocol: u8,
    pub comment: String,
    pub brand: String,
}

/// Opaque signaling payload exchanged between a host and one client.
///
/// `peer_id` names the other side: a client id when the host sends it, the
/// host's join code when the relay hands it to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub peer_id: String,
    pub payload: String,
}

/// Reason byte carried by a [`DisconnectNotice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    FinishedSuccess = 0x00,
    FinishedFailed = 0x01,
    Timeout = 0x02,
    InvalidOperation = 0x03,
    InternalError = 0x04,
    ServerDisconnect = 0x05,
    Unknown = 0x06,
    TooManyWorlds = 0x07,
    RateLimitBlock = 0x08,
    RateLimitLockout = 0x09,
}

/// Tells a peer it is being (or should be) disconnected.
///
/// Sent by the relay to a peer being dropped, and by a host to the relay to
/// kick one of its clients (`client_id` names the client in that case).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    pub client_id: String,
    pub reason: u8,
    pub message: String,
}

impl DisconnectNotice {
    pub fn new(
        client_id: impl Into<String>,
        reason: DisconnectReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            reason: reason as u8,
            message: message.into(),
        }
    }

    pub fn too_many_worlds() -> Self {
        Self::new(
            "",
            DisconnectReason::TooManyWorlds,
            "Too many worlds are open on this address",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new("", DisconnectReason::RateLimitBlock, "Rate limited")
    }

    pub fn locked_out() -> Self {
        Self::new(
            "",
            DisconnectReason::RateLimitLockout,
            "Rate limited, locked out",
        )
    }
}

/// Numeric codes carried by an [`ErrorNotice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Internal = 0,
    ProtocolVersion = 1,
    InvalidPacket = 2,
    UnexpectedPacket = 3,
    InvalidCode = 4,
    CodeNotFound = 5,
    UnknownClient = 6,
}

/// Error reported to a peer, usually right before the relay closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub code: u8,
    pub message: String,
}

impl ErrorNotice {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as u8,
            message: message.into(),
        }
    }
}

/// A decoded relay packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Handshake(Handshake),
    IceServers(Vec<IceServer>),
    NewClient { client_id: String },
    IceCandidate(Signal),
    Description(Signal),
    ClientSuccess { client_id: String },
    ClientFailure { client_id: String },
    LocalWorlds(Vec<LocalWorld>),
    Pong(Pong),
    Disconnect(DisconnectNotice),
    Error(ErrorNotice),
}

impl Packet {
    pub fn opcode(&self) -> u8 {
        match self {
            Packet::Handshake(_) => opcode::HANDSHAKE,
            Packet::IceServers(_) => opcode::ICE_SERVERS,
            Packet::NewClient { .. } => opcode::NEW_CLIENT,
            Packet::IceCandidate(_) => opcode::ICE_CANDIDATE,
            Packet::Description(_) => opcode::DESCRIPTION,
            Packet::ClientSuccess { .. } => opcode::CLIENT_SUCCESS,
            Packet::ClientFailure { .. } => opcode::CLIENT_FAILURE,
            Packet::LocalWorlds(_) => opcode::LOCAL_WORLDS,
            Packet::Pong(_) => opcode::PONG,
            Packet::Disconnect(_) => opcode::DISCONNECT,
            Packet::Error(_) => opcode::ERROR,
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Handshake(_) => "Handshake",
            Packet::IceServers(_) => "IceServers",
            Packet::NewClient { .. } => "NewClient",
            Packet::IceCandidate(_) => "IceCandidate",
            Packet::Description(_) => "Description",
            Packet::ClientSuccess { .. } => "ClientSuccess",
            Packet::ClientFailure { .. } => "ClientFailure",
            Packet::LocalWorlds(_) => "LocalWorlds",
            Packet::Pong(_) => "Pong",
            Packet::Disconnect(_) => "Disconnect",
            Packet::Error(_) => "Error",
        }
    }
}

impl From<Handshake> for Packet {
    fn from(h: Handshake) -> Self {
        Packet::Handshake(h)
    }
}

impl From<ErrorNotice> for Packet {
    fn from(e: ErrorNotice) -> Self {
        Packet::Error(e)
    }
}

impl From<DisconnectNotice> for Packet {
    fn from(d: DisconnectNotice) -> Self {
        Packet::Disconnect(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_response_keeps_version_and_type() {
        let req = Handshake {
            version: 1,
            connection_type: ConnectionType::Join as u8,
            code: "abcde".into(),
        };
        let resp = req.with_code("0123456789abcdef");
        assert_eq!(resp.version, 1);
        assert_eq!(resp.kind(), Some(ConnectionType::Join));
        assert_eq!(resp.code, "0123456789abcdef");
        assert_eq!(req.code, "abcde");
    }

    #[test]
    fn unknown_connection_type() {
        let h = Handshake {
            version: 1,
            connection_type: 9,
            code: String::new(),
        };
        assert_eq!(h.kind(), None);
    }

    #[test]
    fn canned_notices_are_distinct() {
        let a = DisconnectNotice::too_many_worlds();
        let b = DisconnectNotice::rate_limited();
        let c = DisconnectNotice::locked_out();
        assert_ne!(a.reason, b.reason);
        assert_ne!(b.reason, c.reason);
        assert!(a.client_id.is_empty() && b.client_id.is_empty() && c.client_id.is_empty());
    }
}
