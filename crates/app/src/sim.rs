//! Stand-ins for the robot's board when running on a desktop: a timer
//! thread in place of the sampling interrupt, and drivers that log what the
//! motors, LED, DAC and OLED would have done.

use std::{
    io::{self, BufRead, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use beat_dance_core::{
    Actuator, DebugOutput, DriveCommand, Indicator, InterruptSampler, Move, SampleSource,
    StartTrigger, Status, StatusDisplay,
};

const TIMER_STACK: usize = 64 * 1024;

/// Fires the sampler at a fixed rate from a dedicated thread. The thread
/// sleeps in short slices and then catches up on every tick that fell due,
/// so the average rate holds even though the host cannot wake every 125 µs.
pub struct SampleTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SampleTimer {
    pub fn spawn<S>(mut sampler: InterruptSampler<S>, period: Duration) -> io::Result<Self>
    where
        S: SampleSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let period_ns = period.as_nanos().max(1);

        let handle = thread::Builder::new()
            .name("sample-timer".into())
            .stack_size(TIMER_STACK)
            .spawn(move || {
                let start = Instant::now();
                let mut ticks: u64 = 0;
                while !thread_stop.load(Ordering::Acquire) {
                    let due = (start.elapsed().as_nanos() / period_ns) as u64;
                    while ticks < due {
                        sampler.tick();
                        ticks += 1;
                    }
                    thread::sleep(period / 2);
                }
                ticks
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the timer and returns the number of ticks fired.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for SampleTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Two wheel motors, reported through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingMotors {
    last: Option<DriveCommand>,
}

impl Actuator for LoggingMotors {
    fn dispatch(&mut self, mv: Move, intensity: u8) {
        let command = mv.drive(intensity);
        tracing::info!(
            %mv,
            left = ?command.left.direction,
            right = ?command.right.direction,
            duty = command.left.duty,
            "motors"
        );
        self.last = Some(command);
    }

    fn stop(&mut self) {
        if self.last.take().is_some() {
            tracing::info!("motors stopped");
        }
    }
}

/// Blue beat LED. Blocks for the pulse like the real one.
#[derive(Debug, Default)]
pub struct ConsoleLed;

impl Indicator for ConsoleLed {
    fn pulse(&mut self, duration: Duration) {
        tracing::debug!(?duration, "led on");
        thread::sleep(duration);
    }
}

/// DAC channel normally watched on a scope.
#[derive(Debug, Default)]
pub struct ScopeChannel;

impl DebugOutput for ScopeChannel {
    fn write(&mut self, level: u16) {
        tracing::trace!(level, "dac");
    }
}

/// OLED replacement: prints the two status lines.
#[derive(Debug)]
pub struct ConsoleDisplay {
    title: String,
}

impl ConsoleDisplay {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl StatusDisplay for ConsoleDisplay {
    fn show(&mut self, status: &Status) {
        println!("{}: {status}", self.title);
        println!("  {}", status.detail());
    }
}

/// The USR button, pressed by hitting Enter.
#[derive(Debug, Default)]
pub struct EnterKey;

impl StartTrigger for EnterKey {
    fn wait_for_press(&mut self) {
        print!("Press Enter to start ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if let Err(err) = io::stdin().lock().read_line(&mut line) {
            tracing::warn!(%err, "could not read start button, starting anyway");
        }
    }
}
