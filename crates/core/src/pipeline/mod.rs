//! Main-loop side of the beat dance: waits for full sample buffers, turns
//! them into energy readings, decides on beats and advances the routine.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::debug_level, Actuator, BeatDetector, Clock, DanceError, DebugOutput, Detection,
    EnergyEstimator, EnergyReading, Indicator, MoveList, MoveSequencer, PipelineConfig, Result,
    SampleBuffer, StartTrigger, Status, StatusDisplay, Step,
};

/// Hardware the pipeline drives.
pub struct Peripherals {
    pub actuator: Box<dyn Actuator>,
    pub indicator: Box<dyn Indicator>,
    pub display: Box<dyn StatusDisplay>,
    pub debug: Option<Box<dyn DebugOutput>>,
}

impl fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripherals")
            .field("debug", &self.debug.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything that happened in one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub reading: EnergyReading,
    pub detection: Detection,
    pub step: Option<Step>,
    /// Processing time, excluding the indicator pulse.
    pub elapsed: Duration,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub cycles: u64,
    pub beats: u64,
    pub moves_dispatched: u64,
    pub waits: u64,
    /// Cycles whose processing took longer than the cycle budget.
    pub budget_overruns: u64,
    /// Buffers the sampler completed before the previous one was consumed.
    pub sample_overruns: u64,
    pub slowest_cycle: Duration,
}

pub struct Pipeline {
    config: PipelineConfig,
    buffer: Arc<SampleBuffer>,
    estimator: EnergyEstimator,
    detector: BeatDetector,
    sequencer: MoveSequencer,
    peripherals: Peripherals,
    clock: Arc<dyn Clock>,
    stats: PipelineStats,
    armed: bool,
    halted: bool,
}

impl Pipeline {
    /// Builds the pipeline around a sample buffer the sampler is (or will
    /// be) filling. Shows the ready status.
    pub fn new(
        config: PipelineConfig,
        moves: MoveList,
        buffer: Arc<SampleBuffer>,
        mut peripherals: Peripherals,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if buffer.capacity() != config.buffer_len {
            return Err(DanceError::InvalidConfig(format!(
                "sample buffer holds {} samples but the configuration expects {}",
                buffer.capacity(),
                config.buffer_len
            )));
        }

        let estimator = EnergyEstimator::new(&config)?;
        let detector = BeatDetector::new(&config);
        tracing::info!(
            moves = moves.len(),
            buffer = config.buffer_len,
            window = config.window_len,
            "pipeline ready"
        );
        peripherals.display.show(&Status::Ready);

        Ok(Self {
            config,
            buffer,
            estimator,
            detector,
            sequencer: MoveSequencer::new(moves),
            peripherals,
            clock,
            stats: PipelineStats::default(),
            armed: false,
            halted: false,
        })
    }

    /// Blocks on the start button, then arms the detector.
    pub fn wait_for_start(&mut self, trigger: &mut dyn StartTrigger) {
        tracing::info!("waiting for start button");
        trigger.wait_for_press();
        self.arm();
    }

    /// Starts the refractory clock and shows the running status. Buffers
    /// completed while idle are discarded.
    pub fn arm(&mut self) {
        self.buffer.take_full();
        self.detector.arm(self.clock.now());
        self.armed = true;
        self.peripherals.display.show(&Status::Running);
        tracing::info!("pipeline armed");
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Processes one buffer if the sampler has completed one. Returns
    /// `Ok(None)` when there was nothing to do.
    pub fn poll(&mut self) -> Result<Option<CycleReport>> {
        if !self.buffer.take_full() {
            return Ok(None);
        }
        self.process_cycle().map(Some)
    }

    fn process_cycle(&mut self) -> Result<CycleReport> {
        let started = self.clock.now();
        let reading = self.estimator.process_buffer(&self.buffer);
        let detection = self.detector.evaluate(reading, started);

        if let Some(debug) = self.peripherals.debug.as_mut() {
            debug.write(debug_level(detection.ratio, self.config.debug_full_scale));
        }

        let step = if detection.is_beat() {
            Some(self.on_beat(&detection)?)
        } else {
            None
        };

        let elapsed = self.clock.now().saturating_sub(started);
        self.record_cycle(elapsed);

        if step.is_some() {
            self.peripherals
                .indicator
                .pulse(self.config.indicator_pulse());
        }

        tracing::trace!(
            energy = reading.instant,
            sum = reading.moving_sum,
            ratio = detection.ratio,
            "cycle"
        );

        Ok(CycleReport {
            reading,
            detection,
            step,
            elapsed,
        })
    }

    fn on_beat(&mut self, detection: &Detection) -> Result<Step> {
        self.stats.beats += 1;
        let step = match self
            .sequencer
            .on_beat(self.peripherals.actuator.as_mut(), self.config.baseline_speed)
        {
            Ok(step) => step,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };

        match step {
            Step::Dispatched(mv) => {
                // motors are running again, so the next halt must stop them
                self.halted = false;
                self.stats.moves_dispatched += 1;
                tracing::info!(ratio = detection.ratio, position = self.sequencer.cursor(), %mv, "beat");
            }
            Step::Waited => {
                self.stats.waits += 1;
                tracing::info!(ratio = detection.ratio, position = self.sequencer.cursor(), "beat (wait)");
            }
        }
        Ok(step)
    }

    fn record_cycle(&mut self, elapsed: Duration) {
        self.stats.cycles += 1;
        self.stats.slowest_cycle = self.stats.slowest_cycle.max(elapsed);
        let budget = self.config.cycle_budget();
        if elapsed > budget {
            self.stats.budget_overruns += 1;
            tracing::warn!(?elapsed, ?budget, "cycle overran its budget");
        }
    }

    /// Runs detection cycles until `shutdown` is raised or a fatal error
    /// occurs. The actuator is stopped on every way out, including unwinding
    /// (see the `Drop` impl).
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<PipelineStats> {
        if !self.armed {
            self.arm();
        }

        let outcome = loop {
            if shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            match self.poll() {
                Ok(Some(_)) => {}
                Ok(None) => std::thread::yield_now(),
                Err(err) => break Err(err),
            }
        };

        self.halt();
        let stats = self.stats();
        match outcome {
            Ok(()) => {
                self.peripherals.display.show(&Status::Finished);
                tracing::info!(
                    cycles = stats.cycles,
                    beats = stats.beats,
                    sample_overruns = stats.sample_overruns,
                    "pipeline stopped"
                );
                Ok(stats)
            }
            Err(err) => Err(err),
        }
    }

    fn fail(&mut self, err: &DanceError) {
        tracing::error!(%err, "pipeline fault");
        self.halt();
        self.peripherals.display.show(&Status::Fault(err.to_string()));
    }

    /// Forces the actuator outputs to the stopped state. Repeated calls are
    /// no-ops until another move is dispatched.
    pub fn halt(&mut self) {
        if !self.halted {
            self.peripherals.actuator.stop();
            self.halted = true;
            tracing::info!("actuators stopped");
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            sample_overruns: self.buffer.overruns(),
            ..self.stats
        }
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn sequencer(&self) -> &MoveSequencer {
        &self.sequencer
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn estimator(&self) -> &EnergyEstimator {
        &self.estimator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.halt();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("cursor", &self.sequencer.cursor())
            .field("stats", &self.stats)
            .field("armed", &self.armed)
            .field("halted", &self.halted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{atomic::AtomicU16, Mutex},
    };

    use super::*;
    use crate::{InterruptSampler, ManualClock, Move, SampleSource};

    #[derive(Default)]
    struct Log {
        moves: Vec<Move>,
        stops: usize,
        pulses: usize,
        statuses: Vec<Status>,
        debug: Vec<u16>,
        fail_pulse: bool,
    }

    type SharedLog = Arc<Mutex<Log>>;

    struct FakeActuator(SharedLog);
    impl Actuator for FakeActuator {
        fn dispatch(&mut self, mv: Move, _intensity: u8) {
            self.0.lock().unwrap().moves.push(mv);
        }
        fn stop(&mut self) {
            self.0.lock().unwrap().stops += 1;
        }
    }

    struct FakeIndicator(SharedLog, Arc<ManualClock>);
    impl Indicator for FakeIndicator {
        fn pulse(&mut self, duration: Duration) {
            let fail = {
                let mut log = self.0.lock().unwrap();
                log.pulses += 1;
                log.fail_pulse
            };
            // the lock is released first so the unwinding stop can still log
            if fail {
                panic!("indicator driver fault");
            }
            self.1.advance(duration);
        }
    }

    struct FakeDisplay(SharedLog);
    impl StatusDisplay for FakeDisplay {
        fn show(&mut self, status: &Status) {
            self.0.lock().unwrap().statuses.push(status.clone());
        }
    }

    struct FakeDebug(SharedLog);
    impl DebugOutput for FakeDebug {
        fn write(&mut self, level: u16) {
            self.0.lock().unwrap().debug.push(level);
        }
    }

    struct Rig {
        pipeline: Pipeline,
        sampler: InterruptSampler<LevelSource>,
        level: Arc<AtomicU16>,
        clock: Arc<ManualClock>,
        log: SharedLog,
    }

    impl Rig {
        fn new(moves: &str) -> Self {
            let config = PipelineConfig {
                buffer_len: 4,
                window_len: 4,
                dc_offset: 0,
                sample_rate_hz: 200,
                ..Default::default()
            };
            let log = SharedLog::default();
            let clock = Arc::new(ManualClock::new());
            let level = Arc::new(AtomicU16::new(0));
            let buffer = Arc::new(SampleBuffer::new(config.buffer_len).unwrap());

            let sampler =
                InterruptSampler::new(LevelSource(level.clone()), buffer.clone()).unwrap();

            let peripherals = Peripherals {
                actuator: Box::new(FakeActuator(log.clone())),
                indicator: Box::new(FakeIndicator(log.clone(), clock.clone())),
                display: Box::new(FakeDisplay(log.clone())),
                debug: Some(Box::new(FakeDebug(log.clone()))),
            };
            let pipeline = Pipeline::new(
                config,
                moves.parse().unwrap(),
                buffer,
                peripherals,
                clock.clone(),
            )
            .unwrap();

            Self {
                pipeline,
                sampler,
                level,
                clock,
                log,
            }
        }

        fn cycle(&mut self, level: u16) -> Result<Option<CycleReport>> {
            self.level.store(level, Ordering::Relaxed);
            for _ in 0..4 {
                self.sampler.tick();
            }
            self.clock.advance(Duration::from_millis(20));
            self.pipeline.poll()
        }
    }

    /// Microphone stuck at whatever level the test sets.
    struct LevelSource(Arc<AtomicU16>);
    impl SampleSource for LevelSource {
        fn read(&mut self) -> u16 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn poll_without_full_buffer_does_nothing() {
        let mut rig = Rig::new("F");
        rig.pipeline.arm();
        assert!(rig.pipeline.poll().unwrap().is_none());
        rig.sampler.tick();
        assert!(rig.pipeline.poll().unwrap().is_none());
    }

    #[test]
    fn shows_ready_then_running() {
        let mut rig = Rig::new("F");
        rig.pipeline.arm();
        let log = rig.log.lock().unwrap();
        assert_eq!(log.statuses, vec![Status::Ready, Status::Running]);
    }

    #[test]
    fn beat_dispatches_and_pulses_once() {
        let mut rig = Rig::new("F\nL");
        rig.pipeline.arm();
        for _ in 0..30 {
            rig.cycle(1).unwrap();
        }
        let report = rig.cycle(10).unwrap().unwrap();

        assert!(report.detection.is_beat());
        assert_eq!(report.step, Some(Step::Dispatched(Move::Forward)));
        let log = rig.log.lock().unwrap();
        assert_eq!(log.moves, vec![Move::Forward]);
        assert_eq!(log.pulses, 1);
        assert_eq!(log.debug.len(), 31);
        assert_eq!(*log.debug.last().unwrap(), 4095);
    }

    #[test]
    fn exhausted_routine_stops_actuator_and_reports_fault() {
        let mut rig = Rig::new("w");
        rig.pipeline.arm();
        for _ in 0..30 {
            rig.cycle(1).unwrap();
        }
        assert_eq!(rig.cycle(10).unwrap().unwrap().step, Some(Step::Waited));
        for _ in 0..30 {
            rig.cycle(1).unwrap();
        }

        let err = rig.cycle(10).unwrap_err();
        assert!(matches!(err, DanceError::SequenceExhausted { len: 1 }));
        let log = rig.log.lock().unwrap();
        assert_eq!(log.stops, 1);
        assert!(matches!(log.statuses.last(), Some(Status::Fault(_))));
        assert!(log.moves.is_empty());
    }

    #[test]
    fn run_returns_on_shutdown_and_stops_actuator() {
        let mut rig = Rig::new("F");
        let shutdown = AtomicBool::new(true);
        let stats = rig.pipeline.run(&shutdown).unwrap();

        assert_eq!(stats.cycles, 0);
        let log = rig.log.lock().unwrap();
        assert_eq!(log.stops, 1);
        assert_eq!(log.statuses.last(), Some(&Status::Finished));
    }

    #[test]
    fn halt_then_drop_stops_actuator_once() {
        let rig = Rig::new("F");
        let log = rig.log.clone();
        let mut pipeline = rig.pipeline;
        pipeline.halt();
        drop(pipeline);
        assert_eq!(log.lock().unwrap().stops, 1);
    }

    #[test]
    fn dropping_after_a_move_stops_actuator() {
        let mut rig = Rig::new("F");
        rig.pipeline.arm();
        for _ in 0..30 {
            rig.cycle(1).unwrap();
        }
        rig.cycle(10).unwrap();

        drop(rig.pipeline);
        let log = rig.log.lock().unwrap();
        assert_eq!(log.moves, vec![Move::Forward]);
        assert_eq!(log.stops, 1);
    }

    #[test]
    fn move_after_halt_is_stopped_again() {
        let mut rig = Rig::new("F\nL");
        let shutdown = AtomicBool::new(true);
        rig.pipeline.run(&shutdown).unwrap();
        assert_eq!(rig.log.lock().unwrap().stops, 1);

        for _ in 0..30 {
            rig.cycle(1).unwrap();
        }
        let report = rig.cycle(10).unwrap().unwrap();
        assert_eq!(report.step, Some(Step::Dispatched(Move::Forward)));

        rig.pipeline.run(&shutdown).unwrap();
        drop(rig.pipeline);
        let log = rig.log.lock().unwrap();
        assert_eq!(log.moves, vec![Move::Forward]);
        assert_eq!(log.stops, 2);
    }

    #[test]
    fn panic_inside_run_still_stops_actuator() {
        let mut rig = Rig::new("F");
        rig.pipeline.arm();
        for _ in 0..30 {
            rig.cycle(1).unwrap();
        }
        rig.log.lock().unwrap().fail_pulse = true;
        rig.level.store(10, Ordering::Relaxed);
        for _ in 0..4 {
            rig.sampler.tick();
        }
        rig.clock.advance(Duration::from_millis(20));

        let pipeline = rig.pipeline;
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut pipeline = pipeline;
            pipeline.run(&AtomicBool::new(false))
        }));

        assert!(outcome.is_err());
        let log = rig.log.lock().unwrap();
        assert_eq!(log.moves, vec![Move::Forward]);
        assert_eq!(log.pulses, 1);
        assert_eq!(log.stops, 1);
    }

    #[test]
    fn counts_overruns_from_the_sampler() {
        let mut rig = Rig::new("F");
        rig.pipeline.arm();
        for _ in 0..12 {
            rig.sampler.tick();
        }
        assert_eq!(rig.pipeline.stats().sample_overruns, 2);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let peripherals = Peripherals {
            actuator: Box::new(FakeActuator(SharedLog::default())),
            indicator: Box::new(FakeIndicator(SharedLog::default(), Arc::new(ManualClock::new()))),
            display: Box::new(FakeDisplay(SharedLog::default())),
            debug: None,
        };
        let err = Pipeline::new(
            PipelineConfig::default(),
            "F".parse().unwrap(),
            Arc::new(SampleBuffer::new(8).unwrap()),
            peripherals,
            Arc::new(ManualClock::new()),
        )
        .unwrap_err();
        assert!(matches!(err, DanceError::InvalidConfig(_)));
    }
}
