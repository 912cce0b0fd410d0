//! Core library for the beat dance robot.
//!
//! A timer interrupt samples the microphone into a shared ring buffer; the
//! main loop turns every full buffer into an energy reading, compares it with
//! the trailing average to find beats, and steps through a scripted list of
//! dance moves on each beat. Each module owns one stage of that pipeline and
//! the hardware it talks to sits behind the traits in [`drivers`].

pub mod analysis;
pub mod audio;
pub mod config;
pub mod drivers;
pub mod error;
pub mod mapping;
pub mod pipeline;
pub mod routine;
pub mod timeline;

pub use analysis::{
    energy, BeatDecision, BeatDetector, Detection, EnergyEstimator, EnergyReading, EnergyWindow,
};
pub use audio::{ClickTrack, InterruptSampler, RawSample, SampleBuffer, SampleSource};
pub use config::{AppConfig, PipelineConfig};
pub use drivers::{Actuator, DebugOutput, Indicator, StartTrigger, Status, StatusDisplay};
pub use error::{DanceError, Result};
pub use mapping::{Direction, DriveCommand, Move, WheelDrive};
pub use pipeline::{CycleReport, Peripherals, Pipeline, PipelineStats};
pub use routine::{MoveList, MoveSequencer, MoveToken, Step};
pub use timeline::{Clock, ManualClock, SystemClock};
