// CPUSCALE -- FRAME-PACED CPU SCALING FOR EMULATION FRONTENDS
//
// DECISIONS HAPPEN PER FRAME ON THE EMULATION THREAD (NO I/O)
// A WORKER THREAD APPLIES THEM THROUGH cpufreq SYSFS

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cpuscale::sysfs::DEFAULT_ROOT;
use cpuscale::tuning::{self, Config};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "cpuscale")]
#[command(about = "CPUSCALE -- FRAME-PACED CPU SCALING")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // DETECT CLUSTERS, FREQUENCIES AND THE PERF-STATE LADDER
    Probe {
        #[arg(long, default_value = DEFAULT_ROOT)]
        root: PathBuf,
    },

    // DRIVE THE ENGINE WITH SYNTHETIC FRAMES, NO HARDWARE ACCESS
    Simulate(cli::simulate::SimulateArgs),

    // LIVE DAEMON: WORKER ON SYSFS, BUSY-LOOP FRAMES UNTIL CTRL+C
    Run {
        #[arg(long, default_value = DEFAULT_ROOT)]
        root: PathBuf,

        #[arg(long, default_value_t = 60.0)]
        fps: f64,

        // SYNTHETIC WORK PER FRAME AS % OF THE BUDGET AT FULL SPEED
        #[arg(long, default_value_t = 50)]
        load_pct: u32,

        // NEVER RE-READ cpufreq NODES BEFORE WRITING
        #[arg(long)]
        trust_cache: bool,

        #[command(flatten)]
        tuning: TuningArgs,
    },
}

// Config OVERRIDES SHARED BY simulate AND run
#[derive(Args, Clone, Copy)]
pub struct TuningArgs {
    #[arg(long, default_value_t = tuning::DEFAULT_WINDOW_FRAMES)]
    window_frames: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_UTIL_HIGH)]
    util_high: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_UTIL_LOW)]
    util_low: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_BOOST_WINDOWS)]
    boost_windows: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_REDUCE_WINDOWS)]
    reduce_windows: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_STARTUP_GRACE)]
    startup_grace: u32,

    // FLOOR FOR USABLE FREQUENCIES (KHZ)
    #[arg(long, default_value_t = tuning::DEFAULT_MIN_FREQ_KHZ)]
    min_freq_khz: u32,

    #[arg(long, default_value_t = tuning::DEFAULT_MIN_BUFFER_FOR_REDUCE)]
    min_buffer: u32,
}

impl TuningArgs {
    pub fn config(&self) -> Result<Config> {
        if self.util_low >= self.util_high {
            bail!("--util-low ({}) must be below --util-high ({})", self.util_low, self.util_high);
        }
        Ok(Config {
            window_frames: self.window_frames.max(1),
            util_high: self.util_high,
            util_low: self.util_low,
            boost_windows: self.boost_windows,
            reduce_windows: self.reduce_windows,
            startup_grace: self.startup_grace,
            min_freq_khz: self.min_freq_khz,
            min_buffer_for_reduce: self.min_buffer,
            ..Config::default()
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Probe { root } => cli::probe::run_probe(&root),
        Command::Simulate(args) => cli::simulate::run_simulate(&args),
        Command::Run { root, fps, load_pct, trust_cache, tuning } => {
            let config = tuning.config()?;
            ctrlc::set_handler(move || {
                SHUTDOWN.store(true, Ordering::Relaxed);
            })?;
            cli::run::run_daemon(&root, fps, load_pct, trust_cache, config, &SHUTDOWN)
        }
    }
}
