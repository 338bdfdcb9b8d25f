use thiserror::Error;

/// Errors produced by the relay protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("empty frame")]
    EmptyFrame,

    #[error("truncated packet 0x{opcode:02x}: needed {needed} more bytes")]
    Truncated { opcode: u8, needed: usize },

    #[error("packet 0x{opcode:02x} has {count} trailing bytes")]
    TrailingBytes { opcode: u8, count: usize },

    #[error("invalid string in packet 0x{0:02x}: not utf-8")]
    InvalidString(u8),

    #[error("string too long for {prefix_bits}-bit length prefix: {len} bytes")]
    StringTooLong { prefix_bits: u8, len: usize },

    #[error("too many entries for list: {0}")]
    ListTooLong(usize),

    #[error("duplicate opcode registration: 0x{0:02x}")]
    DuplicateOpcode(u8),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether this error came out of the packet codec (as opposed to I/O or config).
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownOpcode(_)
                | RelayError::EmptyFrame
                | RelayError::Truncated { .. }
                | RelayError::TrailingBytes { .. }
                | RelayError::InvalidString(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
