use log::{debug, info, warn};

use crate::{
    Packet, Printable,
    payload::{ParsePayloadError, Payload, SpeedCommand, parse_payload},
};

/// Consumer of speed setpoints. Clamping to the motors' range is its own job.
pub trait MotorControl {
    fn set_speeds(&mut self, left: u16, right: u16);
}

/// Consumer of debug text coming off the link.
pub trait TelemetrySink {
    fn publish_debug(&mut self, text: &[u8]);
}

/// Discards everything.
impl MotorControl for () {
    fn set_speeds(&mut self, _left: u16, _right: u16) {}
}

impl TelemetrySink for () {
    fn publish_debug(&mut self, _text: &[u8]) {}
}

impl<T: MotorControl + ?Sized> MotorControl for &mut T {
    fn set_speeds(&mut self, left: u16, right: u16) {
        (**self).set_speeds(left, right)
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for &mut T {
    fn publish_debug(&mut self, text: &[u8]) {
        (**self).publish_debug(text)
    }
}

/// What happened to a dispatched packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Speed(SpeedCommand),
    Message { len: usize },
    Unknown(u8),
    Malformed(ParsePayloadError),
}

/// Routes decoded packets to the collaborator that consumes them.
pub struct Dispatcher<M, T> {
    motor: M,
    telemetry: T,
}

impl<M: MotorControl, T: TelemetrySink> Dispatcher<M, T> {
    pub fn new(motor: M, telemetry: T) -> Self {
        Self { motor, telemetry }
    }

    /// Never fails; anything that cannot be acted on is logged and dropped.
    pub fn dispatch(&mut self, packet: &Packet) -> Dispatched {
        match parse_payload(packet) {
            Ok(Payload::Speed(speed)) => {
                debug!("speed: left {} right {}", speed.left, speed.right);
                self.motor.set_speeds(speed.left, speed.right);
                Dispatched::Speed(speed)
            }
            Ok(Payload::Message(text)) => {
                info!("device message: {}", Printable(text));
                self.telemetry.publish_debug(text);
                Dispatched::Message { len: text.len() }
            }
            Ok(Payload::Unknown { kind, payload }) => {
                warn!(
                    "Unknown packet type '{}' ({} bytes) - ignoring",
                    kind as char,
                    payload.len()
                );
                Dispatched::Unknown(kind)
            }
            Err(e) => {
                warn!("bad payload for {:?}: {e}", packet.kind);
                Dispatched::Malformed(e)
            }
        }
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn into_parts(self) -> (M, T) {
        (self.motor, self.telemetry)
    }
}
