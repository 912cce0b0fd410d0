//! Sample acquisition: the circular buffer shared between the sampling
//! interrupt and the main loop, and the interrupt handler that fills it.
//!
//! The buffer is the one piece of state touched from both contexts. It is a
//! single-producer/single-consumer handoff built on atomics: the interrupt
//! stores samples and publishes the full flag with release ordering, the main
//! loop clears the flag with an acquire swap and only then reads the samples.
//! Capacity sizing guarantees the producer does not come back to the same
//! slots for another `N` ticks, which is the main loop's processing budget.

use std::sync::{
    atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crate::{DanceError, Result};

/// One ADC reading. DC offset not removed.
pub type RawSample = u16;

/// Largest value a 12-bit converter can report.
pub const ADC_MAX: RawSample = 4095;

/// Analog input read once per sampling tick. Must return within the
/// interrupt's time budget.
pub trait SampleSource: Send {
    fn read(&mut self) -> RawSample;
}

impl<F> SampleSource for F
where
    F: FnMut() -> RawSample + Send,
{
    fn read(&mut self) -> RawSample {
        self()
    }
}

/// Fixed-capacity ring of raw samples with a buffer-full signal.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Box<[AtomicU16]>,
    cursor: AtomicUsize,
    full: AtomicBool,
    overruns: AtomicU64,
    producer_claimed: AtomicBool,
}

impl SampleBuffer {
    /// Allocates the ring once. It never grows.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DanceError::InvalidConfig(
                "sample buffer length must be positive".to_string(),
            ));
        }

        Ok(Self {
            samples: (0..capacity).map(|_| AtomicU16::new(0)).collect(),
            cursor: AtomicUsize::new(0),
            full: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
            producer_claimed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Slot the next sample will be written to.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Peeks at the full flag without consuming it.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Consumer side: observes and clears the buffer-full signal in one step.
    /// Returns `true` at most once per wrap of the ring.
    pub fn take_full(&self) -> bool {
        self.full.swap(false, Ordering::Acquire)
    }

    /// Number of wraps that found the previous full signal still pending,
    /// i.e. buffers the main loop failed to consume in time.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Reads the buffer contents in slot order. Only meaningful right after
    /// [`SampleBuffer::take_full`] returned `true`.
    pub fn samples(&self) -> impl ExactSizeIterator<Item = RawSample> + '_ {
        self.samples.iter().map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Producer side. Stores one sample and advances the cursor, raising the
    /// full signal when the cursor wraps to zero.
    fn push(&self, sample: RawSample) -> bool {
        let cursor = self.cursor.load(Ordering::Relaxed);
        self.samples[cursor].store(sample, Ordering::Relaxed);

        let next = cursor + 1;
        if next < self.samples.len() {
            self.cursor.store(next, Ordering::Relaxed);
            return false;
        }

        self.cursor.store(0, Ordering::Relaxed);
        if self.full.swap(true, Ordering::Release) {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        true
    }
}

/// Timer interrupt handler. Reads one sample per tick into the shared
/// [`SampleBuffer`]; the buffer-full signal is its only output.
///
/// Only one sampler may write to a given buffer at a time.
#[derive(Debug)]
pub struct InterruptSampler<S> {
    source: S,
    buffer: Arc<SampleBuffer>,
}

impl<S: SampleSource> InterruptSampler<S> {
    /// Claims the producer side of `buffer`.
    pub fn new(source: S, buffer: Arc<SampleBuffer>) -> Result<Self> {
        if buffer.producer_claimed.swap(true, Ordering::AcqRel) {
            return Err(DanceError::msg("sample buffer already has a sampler attached"));
        }
        Ok(Self { source, buffer })
    }

    /// One timer tick. Returns `true` when this tick completed a buffer.
    #[inline]
    pub fn tick(&mut self) -> bool {
        let sample = self.source.read();
        self.buffer.push(sample)
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }
}

impl<S> Drop for InterruptSampler<S> {
    fn drop(&mut self) {
        self.buffer.producer_claimed.store(false, Ordering::Release);
    }
}

/// Synthetic microphone: a quiet ripple around the DC offset with a loud,
/// decaying burst at the start of every beat period.
#[derive(Debug, Clone)]
pub struct ClickTrack {
    offset: i32,
    period: u64,
    burst_len: u64,
    quiet_amplitude: i32,
    burst_amplitude: i32,
    position: u64,
}

impl ClickTrack {
    pub fn new(sample_rate_hz: u32, bpm: u32, offset: RawSample) -> Self {
        let period = (u64::from(sample_rate_hz) * 60 / u64::from(bpm.max(1))).max(1);
        Self {
            offset: i32::from(offset),
            period,
            // 40 ms of click
            burst_len: (u64::from(sample_rate_hz) / 25).clamp(1, period),
            quiet_amplitude: 40,
            burst_amplitude: 1200,
            position: 0,
        }
    }

    /// Samples between two clicks.
    pub fn period(&self) -> u64 {
        self.period
    }
}

impl SampleSource for ClickTrack {
    fn read(&mut self) -> RawSample {
        let phase = self.position % self.period;
        let polarity = if (self.position / 2) % 2 == 0 { 1 } else { -1 };
        self.position += 1;

        let swing = if phase < self.burst_len {
            let remaining = (self.burst_len - phase) as i32;
            self.burst_amplitude * remaining / self.burst_len as i32
        } else {
            self.quiet_amplitude
        };

        (self.offset + polarity * swing).clamp(0, i32::from(ADC_MAX)) as RawSample
    }
}
