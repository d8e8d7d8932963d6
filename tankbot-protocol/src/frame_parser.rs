use thiserror::Error;

use crate::{FRAME_CR, FRAME_LF, MAX_PAYLOAD_LENGTH, Packet, PacketType, PayloadBuf, SYNC_BYTE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Sync1,
    Sync2,
    Type,
    Length,
    Data,
    Checksum,
    Cr,
    Lf,
}

/// A resynchronizing parser for the `$$` framed packet format.
///
/// Bytes are fed one at a time. Any violation drops the frame in progress and
/// the parser goes back to hunting for the next `$$`.
pub struct FrameParser {
    state: State,
    packet: Packet,
    length: u8,
    checksum: u8,
    stats: ParserStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub packets: u32,
    pub dropped_frames: u32,
    /// Bytes thrown away while looking for a sync marker.
    pub discarded_bytes: u32,
}

pub enum FrameParserResult<'b> {
    /// A packet was completed by the last consumed byte.
    Ready { packet: &'b Packet, consumed: usize },
    /// Every byte was consumed without finishing a packet.
    Incomplete,
    Error { err: FrameError, consumed: usize },
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Ignoring long packet: {} (length {length})", as_char(.kind))]
    Oversized { kind: u8, length: u8 },
    #[error("Packet checksum failed. Got 0x{got:02x}, expected 0x{expected:02x}")]
    ChecksumMismatch { got: u8, expected: u8 },
    #[error("Invalid packet end byte. Got 0x{got:02x}, expected 0x{expected:02x}")]
    TerminatorMismatch { got: u8, expected: u8 },
}

fn as_char(byte: &u8) -> char {
    *byte as char
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::Sync1,
            packet: Packet {
                kind: PacketType::Unknown(0),
                payload: PayloadBuf::new(),
            },
            length: 0,
            checksum: 0,
            stats: ParserStats::default(),
        }
    }

    /// Feed bytes until one packet completes or one frame is dropped.
    /// `consumed` tells the caller where to resume.
    pub fn parse<'a>(&'a mut self, bytes: &[u8]) -> FrameParserResult<'a> {
        for (idx, byte) in bytes.iter().enumerate() {
            match self.step(*byte) {
                Ok(true) => {
                    return FrameParserResult::Ready {
                        packet: &self.packet,
                        consumed: idx + 1,
                    };
                }
                Ok(false) => {}
                Err(err) => {
                    return FrameParserResult::Error {
                        err,
                        consumed: idx + 1,
                    };
                }
            }
        }
        FrameParserResult::Incomplete
    }

    pub fn parse_byte(&mut self, byte: u8) -> Result<Option<&Packet>, FrameError> {
        Ok(self.step(byte)?.then_some(&self.packet))
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// True while no frame is in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::Sync1
    }

    fn drop_frame(&mut self, err: FrameError) -> Result<bool, FrameError> {
        self.state = State::Sync1;
        self.stats.dropped_frames = self.stats.dropped_frames.wrapping_add(1);
        Err(err)
    }

    /// Returns true when `byte` completed a packet.
    fn step(&mut self, byte: u8) -> Result<bool, FrameError> {
        match self.state {
            State::Sync1 => {
                if byte == SYNC_BYTE {
                    self.state = State::Sync2;
                } else {
                    self.stats.discarded_bytes = self.stats.discarded_bytes.wrapping_add(1);
                }
            }
            State::Sync2 => {
                if byte == SYNC_BYTE {
                    self.state = State::Type;
                } else {
                    // the lone '$' is garbage too
                    self.stats.discarded_bytes = self.stats.discarded_bytes.wrapping_add(2);
                    self.state = State::Sync1;
                }
            }
            State::Type => {
                self.packet.kind = PacketType::from_byte(byte);
                self.state = State::Length;
            }
            State::Length => {
                if byte as usize > MAX_PAYLOAD_LENGTH {
                    return self.drop_frame(FrameError::Oversized {
                        kind: self.packet.kind.as_byte(),
                        length: byte,
                    });
                }
                self.length = byte;
                self.checksum = 0;
                self.packet.payload.clear();
                self.state = if byte == 0 {
                    State::Checksum
                } else {
                    State::Data
                };
            }
            State::Data => {
                self.checksum ^= byte;
                // length was checked against the capacity, so this cannot fail
                let _ = self.packet.payload.push(byte);
                if self.packet.payload.len() == self.length as usize {
                    self.state = State::Checksum;
                }
            }
            State::Checksum => {
                if byte != self.checksum {
                    return self.drop_frame(FrameError::ChecksumMismatch {
                        got: byte,
                        expected: self.checksum,
                    });
                }
                self.state = State::Cr;
            }
            State::Cr => {
                if byte != FRAME_CR {
                    return self.drop_frame(FrameError::TerminatorMismatch {
                        got: byte,
                        expected: FRAME_CR,
                    });
                }
                self.state = State::Lf;
            }
            State::Lf => {
                if byte != FRAME_LF {
                    return self.drop_frame(FrameError::TerminatorMismatch {
                        got: byte,
                        expected: FRAME_LF,
                    });
                }
                self.state = State::Sync1;
                self.stats.packets = self.stats.packets.wrapping_add(1);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
