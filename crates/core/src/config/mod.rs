use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{DanceError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Immutable constants of the acquisition and detection pipeline.
///
/// The defaults reproduce the reference rig: a 12-bit microphone ADC
/// sampled at 8 kHz into a 160 sample buffer, giving a 20 ms cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timer interrupt rate of the sampler.
    pub sample_rate_hz: u32,
    /// Capacity N of the circular sample buffer.
    pub buffer_len: usize,
    /// Number M of instantaneous-energy epochs in the moving sum.
    pub window_len: usize,
    /// ADC reading of the microphone at silence.
    pub dc_offset: u16,
    /// The energy ratio must strictly exceed this to count as a beat.
    pub beat_threshold: f64,
    /// Reserved. Not consulted by the beat decision.
    pub silence_threshold: f64,
    /// Minimum time between two accepted beats.
    pub refractory_ms: u64,
    /// Length of the blocking indicator flash on each beat.
    pub indicator_pulse_ms: u64,
    /// Intensity handed to the actuator with every move.
    pub baseline_speed: u8,
    /// Ratio that maps to full scale on the debug output.
    pub debug_full_scale: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 8_000,
            buffer_len: 160,
            window_len: 50,
            dc_offset: 1523,
            beat_threshold: 2.0,
            silence_threshold: 1.3,
            refractory_ms: 400,
            indicator_pulse_ms: 20,
            baseline_speed: 60,
            debug_full_scale: 3.0,
        }
    }
}

impl PipelineConfig {
    /// Time between two buffer-full signals. Main-loop processing of one
    /// buffer has to finish inside this window.
    pub fn cycle_budget(&self) -> Duration {
        let nanos = self.buffer_len as u128 * 1_000_000_000 / u128::from(self.sample_rate_hz.max(1));
        Duration::from_nanos(nanos as u64)
    }

    pub fn refractory(&self) -> Duration {
        Duration::from_millis(self.refractory_ms)
    }

    pub fn indicator_pulse(&self) -> Duration {
        Duration::from_millis(self.indicator_pulse_ms)
    }

    /// Period of the sampling timer.
    pub fn tick_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.sample_rate_hz.max(1)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(invalid("sample rate must be positive"));
        }
        if self.buffer_len == 0 {
            return Err(invalid("sample buffer length must be positive"));
        }
        if self.window_len == 0 {
            return Err(invalid("energy window length must be positive"));
        }
        if !(self.beat_threshold.is_finite() && self.beat_threshold > 0.0) {
            return Err(invalid("beat threshold must be a positive number"));
        }
        if !(self.debug_full_scale.is_finite() && self.debug_full_scale > 0.0) {
            return Err(invalid("debug full scale must be a positive number"));
        }
        if self.indicator_pulse() > self.cycle_budget() {
            return Err(invalid(format!(
                "indicator pulse of {} ms exceeds the {:?} cycle budget",
                self.indicator_pulse_ms,
                self.cycle_budget()
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> DanceError {
    DanceError::InvalidConfig(reason.into())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_reference_rig() {
        let config = PipelineConfig::default();
        assert_eq!(config.buffer_len, 160);
        assert_eq!(config.window_len, 50);
        assert_eq!(config.dc_offset, 1523);
        assert_eq!(config.cycle_budget(), Duration::from_millis(20));
        assert_eq!(config.tick_period(), Duration::from_micros(125));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_pulse_longer_than_cycle() {
        let config = PipelineConfig {
            indicator_pulse_ms: 25,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DanceError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_window() {
        let config = PipelineConfig {
            window_len: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json_str(r#"{ "pipeline": { "refractory_ms": 300 } }"#).unwrap();
        assert_eq!(config.pipeline.refractory_ms, 300);
        assert_eq!(config.pipeline.buffer_len, 160);
    }

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "pipeline": {{ "dc_offset": 2048, "baseline_speed": 80 }} }}"#).unwrap();

        let config = AppConfig::from_json_path(file.path()).unwrap();
        assert_eq!(config.pipeline.dc_offset, 2048);
        assert_eq!(config.pipeline.baseline_speed, 80);
    }

    #[test]
    fn invalid_file_contents_surface_as_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "pipeline": {{ "buffer_len": 0 }} }}"#).unwrap();
        assert!(AppConfig::from_json_path(file.path()).is_err());
    }
}
