//! Opcode-first binary codec for relay packets.
//!
//! Wire format: `[1-byte opcode][variant fields]`. Strings are UTF-8 with a
//! u8 (`str8`) or big-endian u16 (`str16`) byte-length prefix. Framing is the
//! transport's job: one WebSocket message is one packet.
//!
//! Decoders are looked up through a [`PacketRegistry`] built once at startup;
//! an opcode with no registered decoder is a decode failure, as is a frame
//! whose remaining bytes do not match the variant's layout exactly.
//!
//! The registry is decode-side only. [`encode`] is one exhaustive match over
//! the closed [`Packet`] enum, so adding a variant fails to compile until it
//! has a writer; `standard()` must then register its reader as well.

use crate::error::{RelayError, RelayResult};
use crate::packet::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::OnceLock;

pub type DecodeFn = fn(&mut Reader<'_>) -> RelayResult<Packet>;

/// Opcode → decoder table.
#[derive(Debug, Clone, Default)]
pub struct PacketRegistry {
    decoders: HashMap<u8, DecodeFn>,
}

impl PacketRegistry {
    /// A registry with nothing registered. Every frame fails to decode.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every packet this relay speaks.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        let table: [(u8, DecodeFn); 11] = [
            (opcode::HANDSHAKE, read_handshake),
            (opcode::ICE_SERVERS, read_ice_servers),
            (opcode::NEW_CLIENT, read_new_client),
            (opcode::ICE_CANDIDATE, read_ice_candidate),
            (opcode::DESCRIPTION, read_description),
            (opcode::CLIENT_SUCCESS, read_client_success),
            (opcode::CLIENT_FAILURE, read_client_failure),
            (opcode::LOCAL_WORLDS, read_local_worlds),
            (opcode::PONG, read_pong),
            (opcode::DISCONNECT, read_disconnect),
            (opcode::ERROR, read_error),
        ];
        for (op, decode) in table {
            registry.decoders.insert(op, decode);
        }
        registry
    }

    /// Process-wide standard registry, built on first use.
    pub fn global() -> &'static PacketRegistry {
        static REGISTRY: OnceLock<PacketRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PacketRegistry::standard)
    }

    /// Bind `opcode` to `decode`. Rebinding an opcode is an error.
    pub fn register(&mut self, opcode: u8, decode: DecodeFn) -> RelayResult<()> {
        if self.decoders.contains_key(&opcode) {
            return Err(RelayError::DuplicateOpcode(opcode));
        }
        self.decoders.insert(opcode, decode);
        Ok(())
    }

    pub fn is_registered(&self, opcode: u8) -> bool {
        self.decoders.contains_key(&opcode)
    }

    /// Decode one complete frame.
    pub fn decode(&self, frame: &[u8]) -> RelayResult<Packet> {
        let (&op, body) = frame.split_first().ok_or(RelayError::EmptyFrame)?;
        let decode = self
            .decoders
            .get(&op)
            .ok_or(RelayError::UnknownOpcode(op))?;

        let mut reader = Reader { opcode: op, buf: body };
        let packet = decode(&mut reader)?;
        if reader.buf.has_remaining() {
            return Err(RelayError::TrailingBytes {
                opcode: op,
                count: reader.buf.remaining(),
            });
        }
        Ok(packet)
    }
}

/// Decode a frame with the standard registry.
pub fn decode(frame: &[u8]) -> RelayResult<Packet> {
    PacketRegistry::global().decode(frame)
}

/// Encode a packet into a complete frame.
pub fn encode(packet: &Packet) -> RelayResult<Bytes> {
    let mut w = BytesMut::with_capacity(64);
    w.put_u8(packet.opcode());

    match packet {
        Packet::Handshake(h) => {
            w.put_u8(h.version);
            w.put_u8(h.connection_type);
            put_str8(&mut w, &h.code)?;
        }
        Packet::IceServers(servers) => {
            let count = u16::try_from(servers.len())
                .map_err(|_| RelayError::ListTooLong(servers.len()))?;
            w.put_u16(count);
            for server in servers {
                w.put_u8(server.kind.wire_tag());
                put_str16(&mut w, &server.address)?;
                if server.kind == CredentialKind::Password {
                    put_str8(&mut w, &server.username)?;
                    put_str8(&mut w, &server.password)?;
                }
            }
        }
        Packet::NewClient { client_id }
        | Packet::ClientSuccess { client_id }
        | Packet::ClientFailure { client_id } => {
            put_str8(&mut w, client_id)?;
        }
        Packet::IceCandidate(signal) | Packet::Description(signal) => {
            put_str8(&mut w, &signal.peer_id)?;
            put_str16(&mut w, &signal.payload)?;
        }
        Packet::LocalWorlds(worlds) => {
            let count =
                u8::try_from(worlds.len()).map_err(|_| RelayError::ListTooLong(worlds.len()))?;
            w.put_u8(count);
            for world in worlds {
                put_str8(&mut w, &world.name)?;
                put_str8(&mut w, &world.code)?;
            }
        }
        Packet::Pong(pong) => {
            w.put_u8(pong.protocol);
            put_str8(&mut w, &pong.comment)?;
            put_str8(&mut w, &pong.brand)?;
        }
        Packet::Disconnect(notice) => {
            put_str8(&mut w, &notice.client_id)?;
            w.put_u8(notice.reason);
            put_str16(&mut w, &notice.message)?;
        }
        Packet::Error(notice) => {
            w.put_u8(notice.code);
            put_str16(&mut w, &notice.message)?;
        }
    }

    Ok(w.freeze())
}

/// Disconnect notices that are sent often enough to be encoded once.
///
/// Rate-limited rejections write these bytes directly, so turning away an
/// abusive address costs no allocation.
#[derive(Debug, Clone)]
pub struct CannedNotices {
    pub too_many_worlds: Bytes,
    pub rate_limited: Bytes,
    pub locked_out: Bytes,
}

impl CannedNotices {
    pub fn encode() -> RelayResult<Self> {
        Ok(Self {
            too_many_worlds: encode(&DisconnectNotice::too_many_worlds().into())?,
            rate_limited: encode(&DisconnectNotice::rate_limited().into())?,
            locked_out: encode(&DisconnectNotice::locked_out().into())?,
        })
    }
}

fn put_str8(w: &mut BytesMut, s: &str) -> RelayResult<()> {
    let len = u8::try_from(s.len()).map_err(|_| RelayError::StringTooLong {
        prefix_bits: 8,
        len: s.len(),
    })?;
    w.put_u8(len);
    w.put_slice(s.as_bytes());
    Ok(())
}

fn put_str16(w: &mut BytesMut, s: &str) -> RelayResult<()> {
    let len = u16::try_from(s.len()).map_err(|_| RelayError::StringTooLong {
        prefix_bits: 16,
        len: s.len(),
    })?;
    w.put_u16(len);
    w.put_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked cursor over a frame body.
pub struct Reader<'a> {
    opcode: u8,
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> RelayResult<()> {
        if self.buf.remaining() < n {
            return Err(RelayError::Truncated {
                opcode: self.opcode,
                needed: n - self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> RelayResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> RelayResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn string(&mut self, len: usize) -> RelayResult<String> {
        self.need(len)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        let opcode = self.opcode;
        String::from_utf8(head.to_vec()).map_err(|_| RelayError::InvalidString(opcode))
    }

    pub fn str8(&mut self) -> RelayResult<String> {
        let len = self.u8()? as usize;
        self.string(len)
    }

    pub fn str16(&mut self) -> RelayResult<String> {
        let len = self.u16()? as usize;
        self.string(len)
    }
}

fn read_handshake(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::Handshake(Handshake {
        version: r.u8()?,
        connection_type: r.u8()?,
        code: r.str8()?,
    }))
}

fn read_ice_servers(r: &mut Reader<'_>) -> RelayResult<Packet> {
    let count = r.u16()?;
    let mut servers = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let tag = r.u8()?;
        let address = r.str16()?;
        let server = match tag {
            b'T' => {
                let username = r.str8()?;
                let password = r.str8()?;
                IceServer::turn(address, username, password)
            }
            _ => IceServer::stun(address),
        };
        servers.push(server);
    }
    Ok(Packet::IceServers(servers))
}

fn read_new_client(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::NewClient {
        client_id: r.str8()?,
    })
}

fn read_signal(r: &mut Reader<'_>) -> RelayResult<Signal> {
    Ok(Signal {
        peer_id: r.str8()?,
        payload: r.str16()?,
    })
}

fn read_ice_candidate(r: &mut Reader<'_>) -> RelayResult<Packet> {
    read_signal(r).map(Packet::IceCandidate)
}

fn read_description(r: &mut Reader<'_>) -> RelayResult<Packet> {
    read_signal(r).map(Packet::Description)
}

fn read_client_success(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::ClientSuccess {
        client_id: r.str8()?,
    })
}

fn read_client_failure(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::ClientFailure {
        client_id: r.str8()?,
    })
}

fn read_local_worlds(r: &mut Reader<'_>) -> RelayResult<Packet> {
    let count = r.u8()?;
    let mut worlds = Vec::with_capacity(count as usize);
    for _ in 0..count {
        worlds.push(LocalWorld {
            name: r.str8()?,
            code: r.str8()?,
        });
    }
    Ok(Packet::LocalWorlds(worlds))
}

fn read_pong(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::Pong(Pong {
        protocol: r.u8()?,
        comment: r.str8()?,
        brand: r.str8()?,
    }))
}

fn read_disconnect(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::Disconnect(DisconnectNotice {
        client_id: r.str8()?,
        reason: r.u8()?,
        message: r.str16()?,
    }))
}

fn read_error(r: &mut Reader<'_>) -> RelayResult<Packet> {
    Ok(Packet::Error(ErrorNotice {
        code: r.u8()?,
        message: r.str16()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_wire_layout() {
        let frame = encode(&Handshake::new(ConnectionType::Join, "abcd").into()).unwrap();
        assert_eq!(&frame[..], &[0x00, 1, 2, 4, b'a', b'b', b'c', b'd']);
        assert_eq!(
            decode(&frame).unwrap(),
            Packet::Handshake(Handshake::new(ConnectionType::Join, "abcd"))
        );
    }

    #[test]
    fn ice_servers_with_and_without_credentials() {
        let servers = vec![
            IceServer::stun("stun.l.google.com:19302"),
            IceServer::turn("turn.example.com:3478", "user", "pass"),
        ];
        let frame = encode(&Packet::IceServers(servers.clone())).unwrap();
        assert_eq!(frame[0], 0x01);
        assert_eq!(&frame[1..3], &[0, 2]);
        assert_eq!(frame[3], b'S');
        assert_eq!(decode(&frame).unwrap(), Packet::IceServers(servers));
    }

    #[test]
    fn error_notice_layout() {
        let frame = encode(&ErrorNotice::new(ErrorCode::CodeNotFound, "nope").into()).unwrap();
        assert_eq!(&frame[..], &[0xFF, 5, 0, 4, b'n', b'o', b'p', b'e']);
    }

    #[test]
    fn signal_payload_uses_wide_length() {
        let sdp = "v=0\r\n".repeat(100);
        let packet = Packet::Description(Signal {
            peer_id: "0123456789abcdef".into(),
            payload: sdp,
        });
        let frame = encode(&packet).unwrap();
        assert_eq!(decode(&frame).unwrap(), packet);
    }

    #[test]
    fn unknown_opcode_fails() {
        let err = decode(&[0x42, 0, 0]).unwrap_err();
        assert!(matches!(err, RelayError::UnknownOpcode(0x42)));
        assert!(err.is_decode_failure());
    }

    #[test]
    fn empty_frame_fails() {
        assert!(matches!(decode(&[]), Err(RelayError::EmptyFrame)));
    }

    #[test]
    fn truncated_string_fails() {
        // Handshake claiming a 10-byte code but carrying 2.
        let err = decode(&[0x00, 1, 1, 10, b'a', b'b']).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Truncated {
                opcode: 0x00,
                needed: 8
            }
        ));
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut frame = encode(&Packet::NewClient {
            client_id: "abc".into(),
        })
        .unwrap()
        .to_vec();
        frame.push(0);
        assert!(matches!(
            decode(&frame),
            Err(RelayError::TrailingBytes { opcode: 0x02, count: 1 })
        ));
    }

    #[test]
    fn invalid_utf8_fails() {
        let err = decode(&[0x05, 2, 0xC3, 0x28]).unwrap_err();
        assert!(matches!(err, RelayError::InvalidString(0x05)));
    }

    #[test]
    fn oversized_string_rejected_on_encode() {
        let long = "x".repeat(300);
        let err = encode(&Packet::NewClient { client_id: long }).unwrap_err();
        assert!(matches!(
            err,
            RelayError::StringTooLong {
                prefix_bits: 8,
                len: 300
            }
        ));
    }

    #[test]
    fn empty_registry_decodes_nothing() {
        let registry = PacketRegistry::empty();
        let frame = encode(&Handshake::new(ConnectionType::Ping, "").into()).unwrap();
        assert!(matches!(
            registry.decode(&frame),
            Err(RelayError::UnknownOpcode(0x00))
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = PacketRegistry::standard();
        assert!(registry.is_registered(opcode::PONG));
        assert!(matches!(
            registry.register(opcode::PONG, read_pong),
            Err(RelayError::DuplicateOpcode(0x69))
        ));
    }

    #[test]
    fn canned_notices_decode_as_disconnects() {
        let canned = CannedNotices::encode().unwrap();
        match decode(&canned.rate_limited).unwrap() {
            Packet::Disconnect(d) => {
                assert_eq!(d.reason, DisconnectReason::RateLimitBlock as u8);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        assert_eq!(canned.too_many_worlds[0], 0xFE);
        assert_eq!(canned.locked_out[0], 0xFE);
    }

    #[test]
    fn every_encodable_packet_has_a_registered_decoder() {
        let signal = Signal {
            peer_id: "c1".into(),
            payload: "sdp".into(),
        };
        let packets = vec![
            Packet::Handshake(Handshake::new(ConnectionType::Host, "w")),
            Packet::IceServers(vec![IceServer::stun("stun.example.com:3478")]),
            Packet::NewClient { client_id: "c1".into() },
            Packet::IceCandidate(signal.clone()),
            Packet::Description(signal),
            Packet::ClientSuccess { client_id: "c1".into() },
            Packet::ClientFailure { client_id: "c1".into() },
            Packet::LocalWorlds(vec![LocalWorld {
                name: "w".into(),
                code: "abcde".into(),
            }]),
            Packet::Pong(Pong {
                protocol: PROTOCOL_VERSION,
                comment: "relay".into(),
                brand: RELAY_BRAND.into(),
            }),
            Packet::Disconnect(DisconnectNotice::rate_limited()),
            Packet::Error(ErrorNotice::new(ErrorCode::Internal, "oops")),
        ];
        let registry = PacketRegistry::standard();
        for packet in packets {
            let frame = encode(&packet).unwrap();
            assert!(registry.is_registered(frame[0]), "{}", packet.name());
            assert_eq!(registry.decode(&frame).unwrap(), packet);
        }
    }
}
