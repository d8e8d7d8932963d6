//! Speed setpoints to ESC pulse widths.
//!
//! The timer runs 16-bit fast PWM at 50Hz (TOP = 39999, 0.5us per count). The
//! pulse limits were measured from an RC receiver.

use crate::{dispatch::MotorControl, payload::SpeedCommand};

pub const PULSE_MIN: u16 = 1760;
pub const PULSE_MAX: u16 = 3999;
pub const PWM_TOP: u16 = 39999;

/// Output compare registers for the two ESC channels.
pub trait PwmChannels {
    fn set_left_compare(&mut self, value: u16);
    fn set_right_compare(&mut self, value: u16);
}

/// Compare value for a fixed-point fraction, clamped to full speed.
pub fn pulse_for(fraction: u16) -> u16 {
    let fraction = fraction.min(SpeedCommand::FULL) as u32;
    let span = (PULSE_MAX - PULSE_MIN) as u32;
    PULSE_MIN + (fraction * span / SpeedCommand::FULL as u32) as u16
}

pub struct EscMotors<P> {
    pwm: P,
}

impl<P: PwmChannels> EscMotors<P> {
    /// The ESCs refuse to run unless they see the minimum pulse before anything else.
    pub fn new(mut pwm: P) -> Self {
        pwm.set_left_compare(PULSE_MIN);
        pwm.set_right_compare(PULSE_MIN);
        Self { pwm }
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }
}

impl<P: PwmChannels> MotorControl for EscMotors<P> {
    fn set_speeds(&mut self, left: u16, right: u16) {
        self.pwm.set_left_compare(pulse_for(left));
        self.pwm.set_right_compare(pulse_for(right));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Compare {
        left: Vec<u16>,
        right: Vec<u16>,
    }

    impl PwmChannels for Compare {
        fn set_left_compare(&mut self, value: u16) {
            self.left.push(value);
        }
        fn set_right_compare(&mut self, value: u16) {
            self.right.push(value);
        }
    }

    #[test]
    fn pulse_endpoints() {
        assert_eq!(pulse_for(0), PULSE_MIN);
        assert_eq!(pulse_for(10000), PULSE_MAX);
        assert_eq!(pulse_for(u16::MAX), PULSE_MAX);
        assert_eq!(pulse_for(5000), 1760 + 1119);
        assert!(PULSE_MAX < PWM_TOP);
    }

    #[test]
    fn arms_then_follows_setpoints() {
        let mut motors = EscMotors::new(Compare::default());
        motors.set_speeds(10000, 0);
        assert_eq!(motors.pwm().left, vec![PULSE_MIN, PULSE_MAX]);
        assert_eq!(motors.pwm().right, vec![PULSE_MIN, PULSE_MIN]);
    }
}
