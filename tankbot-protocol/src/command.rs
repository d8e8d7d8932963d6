use crate::{
    EncodeError, FRAME_CR, FRAME_LF, MAX_FRAME_LENGTH, MAX_MESSAGE_LENGTH, MAX_PAYLOAD_LENGTH,
    Packet, PacketType, SYNC_BYTE, payload::SpeedCommand,
};

pub type Frame = heapless::Vec<u8, MAX_FRAME_LENGTH>;

/// Something one end of the link wants to tell the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Speed(SpeedCommand),
    /// Debug text. Anything past [`MAX_MESSAGE_LENGTH`] bytes is cut off.
    Message(&'a [u8]),
}

impl Command<'_> {
    pub fn kind(&self) -> PacketType {
        match self {
            Self::Speed(_) => PacketType::Speed,
            Self::Message(_) => PacketType::Message,
        }
    }
}

/**
 * Frame format:
 *
 * - 2 sync bytes, `$$`
 * - packet type, 'S' or 'M'
 * - payload length, 0..=223
 * - payload
 * - checksum, the xor of all payload bytes
 * - `\r\n`
 *
 * There is no escaping; the receiver finds frames by the sync bytes and
 * validates them by the checksum and terminator.
 */
pub fn build_frame(kind: PacketType, payload: &[u8]) -> Result<Frame, EncodeError> {
    if payload.len() > MAX_PAYLOAD_LENGTH {
        return Err(EncodeError::PayloadTooLong { len: payload.len() });
    }
    let mut out = Frame::new();
    // capacity covers the largest payload plus framing, so pushes cannot fail
    let _ = out.extend_from_slice(&[SYNC_BYTE, SYNC_BYTE, kind.as_byte(), payload.len() as u8]);
    let mut checksum = 0;
    for &byte in payload {
        checksum ^= byte;
        let _ = out.push(byte);
    }
    let _ = out.extend_from_slice(&[checksum, FRAME_CR, FRAME_LF]);
    Ok(out)
}

pub fn build_packet(packet: &Packet) -> Frame {
    // a Packet's payload can never exceed the limit
    build_frame(packet.kind, &packet.payload).unwrap_or_default()
}

/// Build the frame for a command.
pub fn build_command(command: &Command) -> Frame {
    let speed;
    let payload: &[u8] = match command {
        Command::Speed(s) => {
            speed = s.to_bytes();
            &speed
        }
        Command::Message(text) => &text[..text.len().min(MAX_MESSAGE_LENGTH)],
    };
    // both payloads are within the limit after truncation
    build_frame(command.kind(), payload).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame_parser::{FrameParser, FrameParserResult};

    #[test]
    fn speed_wire_bytes() {
        let frame = build_command(&Command::Speed(SpeedCommand::new(5000, 10000)));
        assert_eq!(
            frame.as_slice(),
            &[0x24, 0x24, 0x53, 0x04, 0x88, 0x13, 0x10, 0x27, 0xac, 0x0d, 0x0a]
        );
        assert_eq!(frame[8], 0x88 ^ 0x13 ^ 0x10 ^ 0x27);
    }

    #[test]
    fn message_is_truncated_to_200() {
        let text: Vec<u8> = (0..250).map(|i| b'a' + (i % 26) as u8).collect();
        let frame = build_command(&Command::Message(&text));
        assert_eq!(frame.len(), MAX_MESSAGE_LENGTH + 7);
        assert_eq!(frame[3], 200);

        let mut parser = FrameParser::new();
        match parser.parse(&frame) {
            FrameParserResult::Ready { packet, consumed } => {
                assert_eq!(consumed, frame.len());
                assert_eq!(packet.kind, PacketType::Message);
                assert_eq!(packet.payload.as_slice(), &text[..200]);
            }
            _ => panic!("truncated message should still decode"),
        }
    }

    #[test]
    fn frame_limits() {
        assert_eq!(
            build_frame(PacketType::Message, &[0; 224]),
            Err(EncodeError::PayloadTooLong { len: 224 })
        );
        let frame = build_frame(PacketType::Unknown(b'Z'), &[0xaa; 223]).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LENGTH);
        assert_eq!(frame[2], b'Z');
        assert_eq!(frame[3], 223);
        // 223 copies of 0xaa xor to 0xaa
        assert_eq!(frame[MAX_FRAME_LENGTH - 3], 0xaa);
    }

    #[test]
    fn empty_message() {
        let frame = build_command(&Command::Message(b""));
        assert_eq!(frame.as_slice(), b"$$M\x00\x00\r\n");
    }

    #[test]
    fn command_kind_sets_type_byte() {
        let speed = Command::Speed(SpeedCommand::new(0, 0));
        let message = Command::Message(b"hi");
        assert_eq!(speed.kind(), PacketType::Speed);
        assert_eq!(message.kind(), PacketType::Message);
        assert_eq!(build_command(&speed)[2], b'S');
        assert_eq!(build_command(&message)[2], b'M');
    }

    #[test]
    fn packet_frames_match_commands() {
        let packet = Packet::new(PacketType::Message, b"Startup complete").unwrap();
        assert_eq!(
            build_packet(&packet),
            build_command(&Command::Message(b"Startup complete"))
        );
    }
}
