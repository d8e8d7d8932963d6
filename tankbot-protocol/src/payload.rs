use thiserror::Error;

use crate::{Packet, PacketType};

/// Fixed-point fractions of full speed: 0 is stopped, [`SpeedCommand::FULL`] is 1.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeedCommand {
    pub left: u16,
    pub right: u16,
}

impl SpeedCommand {
    pub const FULL: u16 = 10000;

    /// Values above [`Self::FULL`] are clamped.
    pub fn new(left: u16, right: u16) -> Self {
        Self {
            left: left.min(Self::FULL),
            right: right.min(Self::FULL),
        }
    }

    /// Build from real fractions, clamped to 0.0..=1.0. NaN counts as stopped.
    pub fn from_fractions(left: f64, right: f64) -> Self {
        fn scale(fraction: f64) -> u16 {
            if fraction.is_nan() {
                return 0;
            }
            (fraction.clamp(0.0, 1.0) * SpeedCommand::FULL as f64) as u16
        }
        Self::new(scale(left), scale(right))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let [l0, l1] = self.left.to_le_bytes();
        let [r0, r1] = self.right.to_le_bytes();
        [l0, l1, r0, r1]
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, ParsePayloadError> {
        let &[l0, l1, r0, r1] = payload else {
            return Err(ParsePayloadError::SpeedLength { len: payload.len() });
        };
        Ok(Self::new(
            u16::from_le_bytes([l0, l1]),
            u16::from_le_bytes([r0, r1]),
        ))
    }

    pub fn left_fraction(&self) -> f64 {
        self.left as f64 / Self::FULL as f64
    }

    pub fn right_fraction(&self) -> f64 {
        self.right as f64 / Self::FULL as f64
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    Speed(SpeedCommand),
    /// Debug text. The payload length is authoritative, there is no terminator.
    Message(&'a [u8]),
    Unknown { kind: u8, payload: &'a [u8] },
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ParsePayloadError {
    #[error("speed payload must be 4 bytes, got {len}")]
    SpeedLength { len: usize },
}

pub fn parse_payload(packet: &Packet) -> Result<Payload<'_>, ParsePayloadError> {
    Ok(match packet.kind {
        PacketType::Speed => Payload::Speed(SpeedCommand::from_payload(&packet.payload)?),
        PacketType::Message => Payload::Message(&packet.payload),
        PacketType::Unknown(kind) => Payload::Unknown {
            kind,
            payload: &packet.payload,
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn speed_clamps() {
        assert_eq!(SpeedCommand::new(12000, 65535), SpeedCommand::new(10000, 10000));
        assert_eq!(
            SpeedCommand::from_payload(&[0xff, 0xff, 0x88, 0x13]),
            Ok(SpeedCommand {
                left: 10000,
                right: 5000
            })
        );
    }

    #[test]
    fn fractions() {
        assert_eq!(
            SpeedCommand::from_fractions(0.5, 1.0),
            SpeedCommand {
                left: 5000,
                right: 10000
            }
        );
        assert_eq!(
            SpeedCommand::from_fractions(-3.0, 7.5),
            SpeedCommand {
                left: 0,
                right: 10000
            }
        );
        assert_eq!(
            SpeedCommand::from_fractions(f64::NAN, 0.25),
            SpeedCommand {
                left: 0,
                right: 2500
            }
        );
        let speed = SpeedCommand::new(2500, 10000);
        assert_eq!(speed.left_fraction(), 0.25);
        assert_eq!(speed.right_fraction(), 1.0);
    }

    #[test]
    fn speed_payload_layout() {
        let speed = SpeedCommand::new(5000, 10000);
        assert_eq!(speed.to_bytes(), [0x88, 0x13, 0x10, 0x27]);
        assert_eq!(SpeedCommand::from_payload(&speed.to_bytes()), Ok(speed));
    }

    #[test]
    fn payload_types() {
        let packet = Packet::new(PacketType::Speed, &[1, 2, 3]).unwrap();
        assert_eq!(
            parse_payload(&packet),
            Err(ParsePayloadError::SpeedLength { len: 3 })
        );

        let packet = Packet::new(PacketType::Message, b"abc").unwrap();
        assert_eq!(parse_payload(&packet), Ok(Payload::Message(b"abc")));

        let packet = Packet::new(PacketType::Unknown(b'Q'), b"?").unwrap();
        assert_eq!(
            parse_payload(&packet),
            Ok(Payload::Unknown {
                kind: b'Q',
                payload: b"?"
            })
        );
    }
}
