mod sim;

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use beat_dance_core::{
    AppConfig, ClickTrack, InterruptSampler, MoveList, MoveToken, Peripherals, Pipeline,
    SampleBuffer, SystemClock,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::sim::{ConsoleDisplay, ConsoleLed, EnterKey, LoggingMotors, SampleTimer, ScopeChannel};

fn main() -> beat_dance_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::from_json_path(path)?,
        None => AppConfig::default(),
    };

    let outcome = match cli.command {
        Commands::Run {
            moves,
            bpm,
            seconds,
            no_wait,
        } => run_routine(&config, &moves, bpm, seconds, no_wait),
        Commands::Check { moves } => check_moves(&moves),
    };

    if let Err(err) = &outcome {
        if err.is_configuration() {
            tracing::error!(%err, "routine or configuration rejected");
        } else {
            tracing::error!(%err, "run failed");
        }
    }
    outcome
}

fn run_routine(
    config: &AppConfig,
    moves: &Path,
    bpm: u32,
    seconds: u64,
    no_wait: bool,
) -> beat_dance_core::Result<()> {
    let settings = config.pipeline.clone();
    settings.validate()?;
    let routine = MoveList::load(moves)?;
    tracing::info!(?moves, entries = routine.len(), bpm, "starting routine");

    let buffer = Arc::new(SampleBuffer::new(settings.buffer_len)?);
    let microphone = ClickTrack::new(settings.sample_rate_hz, bpm, settings.dc_offset);
    let sampler = InterruptSampler::new(microphone, buffer.clone())?;

    let peripherals = Peripherals {
        actuator: Box::new(LoggingMotors::default()),
        indicator: Box::new(ConsoleLed),
        display: Box::new(ConsoleDisplay::new("BEAT DANCE")),
        debug: Some(Box::new(ScopeChannel)),
    };
    let tick_period = settings.tick_period();
    let mut pipeline = Pipeline::new(
        settings,
        routine,
        buffer,
        peripherals,
        Arc::new(SystemClock::start()),
    )?;

    let timer = SampleTimer::spawn(sampler, tick_period)?;

    if no_wait {
        pipeline.arm();
    } else {
        pipeline.wait_for_start(&mut EnterKey);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let deadline = Arc::clone(&shutdown);
    thread::Builder::new()
        .name("deadline".into())
        .spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            deadline.store(true, Ordering::Release);
        })?;

    let outcome = pipeline.run(&shutdown);
    let ticks = timer.stop();

    let stats = outcome?;
    tracing::info!(
        ticks,
        cycles = stats.cycles,
        beats = stats.beats,
        moves = stats.moves_dispatched,
        waits = stats.waits,
        budget_overruns = stats.budget_overruns,
        sample_overruns = stats.sample_overruns,
        slowest_cycle = ?stats.slowest_cycle,
        "finished"
    );
    Ok(())
}

fn check_moves(moves: &PathBuf) -> beat_dance_core::Result<()> {
    let routine = MoveList::load(moves)?;
    let waits = routine
        .tokens()
        .iter()
        .filter(|token| matches!(token, MoveToken::Wait))
        .count();

    tracing::info!(?moves, entries = routine.len(), "move list is valid");
    for (position, token) in routine.tokens().iter().enumerate() {
        println!("{position:>4}  {token}");
    }
    println!("{} moves, {waits} waits", routine.move_count());
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Dance to the beat picked up by the microphone", long_about = None)]
struct Cli {
    /// JSON file overriding the pipeline constants.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a routine against a simulated microphone playing a click track.
    Run {
        /// Move list, one token per line.
        moves: PathBuf,
        /// Tempo of the simulated click track.
        #[arg(long, default_value_t = 120)]
        bpm: u32,
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        /// Start immediately instead of waiting for Enter.
        #[arg(long)]
        no_wait: bool,
    },
    /// Validate a move list without running it.
    Check {
        /// Move list, one token per line.
        moves: PathBuf,
    },
}
