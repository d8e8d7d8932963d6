#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod device;
pub mod dispatch;
pub mod frame_parser;
pub mod motor;
pub mod payload;
pub mod ring_buffer;

use core::task::Poll;

use thiserror::Error;

pub const SYNC_BYTE: u8 = b'$';
pub const FRAME_CR: u8 = b'\r';
pub const FRAME_LF: u8 = b'\n';

/// Largest payload that still fits, with framing, in a single 256 byte buffer.
pub const MAX_PAYLOAD_LENGTH: usize = 223;
/// 2 sync bytes, type, length, checksum, CR, LF
pub const FRAME_OVERHEAD: usize = 7;
pub const MAX_FRAME_LENGTH: usize = MAX_PAYLOAD_LENGTH + FRAME_OVERHEAD;
/// Debug text is cut to this many bytes before it is framed.
pub const MAX_MESSAGE_LENGTH: usize = 200;

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ *b)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Speed,
    Message,
    Unknown(u8),
}

impl PacketType {
    pub const SPEED: u8 = b'S';
    pub const MESSAGE: u8 = b'M';

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::SPEED => Self::Speed,
            Self::MESSAGE => Self::Message,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Speed => Self::SPEED,
            Self::Message => Self::MESSAGE,
            Self::Unknown(byte) => *byte,
        }
    }
}

pub type PayloadBuf = heapless::Vec<u8, MAX_PAYLOAD_LENGTH>;

/// A decoded packet. The payload lives inline so packets never touch the heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub payload: PayloadBuf,
}

impl Packet {
    pub fn new(kind: PacketType, payload: &[u8]) -> Result<Self, EncodeError> {
        let mut buf = PayloadBuf::new();
        buf.extend_from_slice(payload)
            .map_err(|_| EncodeError::PayloadTooLong { len: payload.len() })?;
        Ok(Self { kind, payload: buf })
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.payload)
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds the 223 byte limit")]
    PayloadTooLong { len: usize },
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("outgoing buffer is full")]
    WouldBlock,
    #[error("connection lost")]
    ConnectionLost,
}

/// What a sender does when the outgoing buffer has no room for a whole frame.
///
/// `Spin` waits until the far end drains the buffer, however long that takes.
/// A sender stuck behind a stalled link stalls with it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backpressure {
    #[default]
    Spin,
    /// Retry this many times before giving up with [`SendError::WouldBlock`].
    Bounded(u32),
    FailFast,
}

impl Backpressure {
    /// Run `attempt` until it is ready, calling `relax` between attempts.
    pub fn drive<T>(
        self,
        mut attempt: impl FnMut() -> Poll<Result<T, SendError>>,
        mut relax: impl FnMut(),
    ) -> Result<T, SendError> {
        let mut retries = 0u32;
        loop {
            if let Poll::Ready(result) = attempt() {
                return result;
            }
            match self {
                Self::Spin => {}
                Self::Bounded(max) if retries < max => {}
                _ => return Err(SendError::WouldBlock),
            }
            retries = retries.saturating_add(1);
            relax();
        }
    }
}

/// Renders raw message bytes for logs, escaping anything that is not printable ascii.
pub struct Printable<'a>(pub &'a [u8]);

impl core::fmt::Display for Printable<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() || *byte == b' ' {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packet_type_bytes() {
        assert_eq!(PacketType::from_byte(b'S'), PacketType::Speed);
        assert_eq!(PacketType::from_byte(b'M'), PacketType::Message);
        assert_eq!(PacketType::from_byte(b'0'), PacketType::Unknown(b'0'));
        assert_eq!(PacketType::Unknown(0x99).as_byte(), 0x99);
        assert_eq!(PacketType::Speed.as_byte(), 0x53);
    }

    #[test]
    fn packet_rejects_long_payload() {
        let payload = [0u8; MAX_PAYLOAD_LENGTH + 1];
        assert_eq!(
            Packet::new(PacketType::Message, &payload),
            Err(EncodeError::PayloadTooLong {
                len: MAX_PAYLOAD_LENGTH + 1
            })
        );
        assert!(Packet::new(PacketType::Message, &payload[1..]).is_ok());
    }

    #[test]
    fn backpressure_policies() {
        let mut calls = 0;
        let res: Result<(), _> = Backpressure::FailFast.drive(
            || {
                calls += 1;
                Poll::Pending
            },
            || {},
        );
        assert_eq!(res, Err(SendError::WouldBlock));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let res: Result<(), _> = Backpressure::Bounded(3).drive(
            || {
                calls += 1;
                Poll::Pending
            },
            || {},
        );
        assert_eq!(res, Err(SendError::WouldBlock));
        assert_eq!(calls, 4);

        // spin keeps going until the attempt succeeds
        let mut calls = 0;
        let res = Backpressure::Spin.drive(
            || {
                calls += 1;
                if calls == 50 {
                    Poll::Ready(Ok(calls))
                } else {
                    Poll::Pending
                }
            },
            || {},
        );
        assert_eq!(res, Ok(50));
    }

    #[test]
    fn printable_escapes() {
        let text = std::format!("{}", Printable(b"ok\r\n"));
        assert_eq!(text, "ok\\x0d\\x0a");
    }
}
