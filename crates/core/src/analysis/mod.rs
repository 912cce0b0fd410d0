use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{audio::ADC_MAX, DanceError, PipelineConfig, RawSample, Result, SampleBuffer};

/// Signal energy of one buffer: the sum of squared, offset-corrected samples.
pub fn energy<I>(samples: I, dc_offset: RawSample) -> u64
where
    I: IntoIterator<Item = RawSample>,
{
    samples
        .into_iter()
        .map(|sample| {
            let centred = i64::from(sample) - i64::from(dc_offset);
            (centred * centred) as u64
        })
        .sum()
}

/// Maps a ratio onto the 12-bit debug output, saturating at `full_scale`.
pub fn debug_level(ratio: f64, full_scale: f64) -> u16 {
    let scaled = ratio * f64::from(ADC_MAX) / full_scale;
    scaled.clamp(0.0, f64::from(ADC_MAX)) as u16
}

/// Sliding window over the last `M` instantaneous energies together with
/// their running sum. The sum is maintained incrementally.
#[derive(Debug, Clone)]
pub struct EnergyWindow {
    entries: Box<[u64]>,
    cursor: usize,
    sum: u64,
    filled: usize,
}

impl EnergyWindow {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DanceError::InvalidConfig(
                "energy window length must be positive".to_string(),
            ));
        }

        Ok(Self {
            entries: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
            sum: 0,
            filled: 0,
        })
    }

    /// Overwrites the oldest entry with `energy` and returns the new sum.
    pub fn push(&mut self, energy: u64) -> u64 {
        let oldest = self.entries[self.cursor];
        self.sum = self.sum - oldest + energy;
        self.entries[self.cursor] = energy;
        self.cursor = (self.cursor + 1) % self.entries.len();
        if self.filled < self.entries.len() {
            self.filled += 1;
        }
        self.sum
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of values pushed so far, capped at the capacity.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_primed(&self) -> bool {
        self.filled == self.entries.len()
    }

    pub fn entries(&self) -> &[u64] {
        &self.entries
    }
}

/// Energy figures for one buffer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnergyReading {
    pub instant: u64,
    pub moving_sum: u64,
}

impl EnergyReading {
    /// Instantaneous energy relative to the trailing average,
    /// `E * M / sum`. Settles at 1 for a steady signal once the window is
    /// full. Zero when the moving sum is zero.
    pub fn ratio(&self, window_len: usize) -> f64 {
        if self.moving_sum == 0 {
            return 0.0;
        }
        self.instant as f64 * window_len as f64 / self.moving_sum as f64
    }
}

/// Turns full sample buffers into [`EnergyReading`]s.
#[derive(Debug, Clone)]
pub struct EnergyEstimator {
    dc_offset: RawSample,
    window: EnergyWindow,
}

impl EnergyEstimator {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            dc_offset: config.dc_offset,
            window: EnergyWindow::new(config.window_len)?,
        })
    }

    /// Consumes one cycle of samples.
    pub fn process<I>(&mut self, samples: I) -> EnergyReading
    where
        I: IntoIterator<Item = RawSample>,
    {
        let instant = energy(samples, self.dc_offset);
        let moving_sum = self.window.push(instant);
        EnergyReading {
            instant,
            moving_sum,
        }
    }

    /// Consumes the current contents of a buffer whose full signal has
    /// already been taken.
    pub fn process_buffer(&mut self, buffer: &SampleBuffer) -> EnergyReading {
        self.process(buffer.samples())
    }

    pub fn window(&self) -> &EnergyWindow {
        &self.window
    }
}

/// Outcome of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatDecision {
    /// Ratio exceeded the threshold outside the refractory period.
    Beat,
    /// Armed, but the ratio did not exceed the threshold.
    BelowThreshold,
    /// Too soon after the previous beat; the ratio was not considered.
    Refractory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub ratio: f64,
    pub decision: BeatDecision,
}

impl Detection {
    pub fn is_beat(&self) -> bool {
        self.decision == BeatDecision::Beat
    }
}

/// Ratio-threshold beat detector with a refractory lockout.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    threshold: f64,
    refractory: Duration,
    window_len: usize,
    last_beat: Duration,
    beats: u64,
}

impl BeatDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.beat_threshold,
            refractory: config.refractory(),
            window_len: config.window_len,
            last_beat: Duration::ZERO,
            beats: 0,
        }
    }

    /// Starts the refractory clock. The first beat can only follow after a
    /// full refractory period from this moment.
    pub fn arm(&mut self, now: Duration) {
        self.last_beat = now;
    }

    /// Whether the refractory period since the last beat has elapsed.
    pub fn is_armed(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_beat) > self.refractory
    }

    pub fn evaluate(&mut self, reading: EnergyReading, now: Duration) -> Detection {
        let ratio = reading.ratio(self.window_len);

        let decision = if !self.is_armed(now) {
            BeatDecision::Refractory
        } else if ratio > self.threshold {
            self.last_beat = now;
            self.beats += 1;
            BeatDecision::Beat
        } else {
            BeatDecision::BelowThreshold
        };

        Detection { ratio, decision }
    }

    pub fn last_beat(&self) -> Duration {
        self.last_beat
    }

    pub fn beats(&self) -> u64 {
        self.beats
    }
}
