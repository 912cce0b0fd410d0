//! Seams to the hardware the pipeline drives. Board support code implements
//! these; the pipeline only ever calls through them.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Move;

/// Wheel motors.
pub trait Actuator {
    /// Starts a move. Must not block for longer than a few microseconds.
    fn dispatch(&mut self, mv: Move, intensity: u8);

    /// Drives every output to the stopped state. Must be safe to call more
    /// than once.
    fn stop(&mut self);
}

/// Beat indicator LED.
pub trait Indicator {
    /// Lights the indicator for `duration`, blocking the caller meanwhile.
    fn pulse(&mut self, duration: Duration);
}

/// Oscilloscope output (12-bit DAC).
pub trait DebugOutput {
    fn write(&mut self, level: u16);
}

/// Text display for phase changes.
pub trait StatusDisplay {
    fn show(&mut self, status: &Status);
}

/// User button that starts the routine.
pub trait StartTrigger {
    /// Blocks until the button has been pressed and released.
    fn wait_for_press(&mut self);
}

/// Phase of the pipeline as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ready,
    Running,
    Finished,
    Fault(String),
}

impl Status {
    /// Second display line under the title.
    pub fn detail(&self) -> &str {
        match self {
            Self::Ready => "Press USR button",
            Self::Running => "Running Routine",
            Self::Finished => "Routine finished",
            Self::Fault(reason) => reason,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Running => f.write_str("running"),
            Self::Finished => f.write_str("finished"),
            Self::Fault(reason) => write!(f, "fault: {reason}"),
        }
    }
}
