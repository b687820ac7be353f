// OFFLINE SIMULATOR
// SYNTHETIC FRAME TIMES SCALED BY THE APPLIED CLOCK. EVERY FRAME: WORKER POLL,
// FRAME, ENGINE UPDATE -- THE SAME ORDER THE LIVE LOOP RUNS IN.

use anyhow::{bail, Result};
use clap::Args;

use cpuscale::control::{CpuControl, Recorder};
use cpuscale::engine::{Controller, FrameInput, Mode};
use cpuscale::event::EventLog;
use cpuscale::freq::predict_frequency;
use cpuscale::topology::{pick_representative_freqs, Cluster, Governor, Topology};
use cpuscale::tuning::{frame_budget_us, Level, MAX_CLUSTERS};

use crate::TuningArgs;

#[derive(Args)]
pub struct SimulateArgs {
    #[arg(long, default_value_t = 60.0)]
    fps: f64,

    #[arg(long, default_value_t = 1200)]
    frames: u64,

    // WORK PER FRAME AS % OF THE BUDGET AT THE TOP CLOCK
    #[arg(long, default_value_t = 40)]
    load_pct: u32,

    // SWITCH TO --heavy-pct FROM THIS FRAME ON
    #[arg(long)]
    heavy_at: Option<u64>,

    #[arg(long, default_value_t = 95)]
    heavy_pct: u32,

    // INJECT ONE AUDIO UNDERRUN AT EACH OF THESE FRAMES
    #[arg(long, value_delimiter = ',')]
    underrun_at: Vec<u64>,

    #[arg(long, default_value_t = 100)]
    audio_fill: u32,

    // AVAILABLE FREQUENCIES (KHZ)
    #[arg(long, value_delimiter = ',', default_value = "400000,600000,800000,1000000")]
    freqs: Vec<u32>,

    // SYNTHETIC CLUSTERS BY MAX KHZ, 4 CPUS EACH (E.G. 1800000,2400000).
    // TWO OR MORE SELECT TOPOLOGY MODE.
    #[arg(long, value_delimiter = ',')]
    clusters: Vec<u32>,

    // FORCE THE 3-LEVEL FALLBACK MODE
    #[arg(long)]
    levels: bool,

    // DUMP EVERY TRANSITION ON EXIT
    #[arg(long)]
    dump_log: bool,

    #[command(flatten)]
    tuning: TuningArgs,
}

// CLUSTER i OWNS CPUS 4i..4i+3, FREQUENCIES max/4, max/2, max
fn synth_topology(max_khz: &[u32]) -> Topology {
    let clusters = max_khz
        .iter()
        .take(MAX_CLUSTERS)
        .enumerate()
        .map(|(i, &max)| Cluster::new(i as u32 * 4, 0xF << (i * 4), vec![max / 4, max / 2, max], max / 4, max))
        .collect();
    Topology::from_clusters(clusters)
}

// CLOCK-SCALED FRAME TIME: WORK AT THE TOP CLOCK STRETCHED BY top/current.
// ON THE LADDER THE CLOCK IS THE ACTIVE CLUSTER'S LOW/MID/HIGH FREQUENCY
// FOR ITS POWERSAVE/SCHEDUTIL/PERFORMANCE GOVERNOR.
fn frame_time_us(mode: &Mode, applied: usize, work_us: u64) -> u64 {
    match mode {
        Mode::Granular(t) => {
            let top = t.khz(t.max_index()).unwrap_or(1) as u64;
            let cur = t.khz(applied).unwrap_or(1).max(1) as u64;
            work_us * top / cur
        }
        Mode::Fallback => work_us * 100 / Level::from_index(applied).percentage() as u64,
        Mode::Topology(t) => {
            let Some(state) = t.state(applied) else {
                return work_us;
            };
            let top = t.clusters().last().map_or(1, |c| c.max_khz).max(1) as u64;
            let (low, mid, high) = pick_representative_freqs(&t.clusters()[state.active_cluster]);
            let cur = match state.governors[state.active_cluster] {
                Governor::Powersave => low,
                Governor::Schedutil => mid,
                Governor::Performance => high,
            };
            work_us * top / cur.max(1) as u64
        }
        Mode::Disabled => work_us,
    }
}

pub fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let config = args.tuning.config()?;
    let mode = if args.levels {
        Mode::Fallback
    } else {
        let topology = (!args.clusters.is_empty()).then(|| synth_topology(&args.clusters));
        Mode::detect(topology, &args.freqs, &config)
    };
    if mode.is_disabled() {
        bail!("need at least two usable frequencies or clusters (got {:?})", args.freqs);
    }

    let mut ctl = Controller::new(config, mode);
    ctl.reset(args.fps, 0);
    let worker = ctl.worker();
    let mut control = Recorder::new();
    let mut log = EventLog::new();

    let budget = frame_budget_us(args.fps);
    let mut underruns = 0u32;
    let mut last_util = 0u32;

    println!("CPUSCALE SIMULATE");
    println!("MODE:            {}", ctl.mode_name().to_uppercase());
    println!("BUDGET:          {} us ({} fps)", budget, args.fps);
    println!("FRAMES:          {}", args.frames);

    for frame in 0..args.frames {
        if let Err(e) = worker.poll_once(&mut control) {
            tracing::warn!(error = %e, "apply failed");
        }
        if let Some(mask) = ctl.take_pending_affinity() {
            control.set_thread_affinity(mask)?;
        }
        let applied = ctl.current().unwrap_or_else(|| ctl.target());

        let load = match args.heavy_at {
            Some(at) if frame >= at => args.heavy_pct,
            _ => args.load_pct,
        };
        let work_us = budget * load as u64 / 100;
        ctl.record_frame_time(frame_time_us(ctl.mode(), applied, work_us));

        if args.underrun_at.contains(&frame) {
            underruns += 1;
        }
        let out = ctl.update(&FrameInput {
            fast_forward: false,
            show_menu: false,
            underruns,
            buffer_fill_pct: args.audio_fill,
        });
        if out.utilization > 0 {
            last_util = out.utilization;
        }
        log.record(frame, &out);
    }

    if args.dump_log {
        log.dump();
    }
    log.summary(ctl.mode_name(), ctl.performance_percent());
    println!("  FINAL TARGET: {}", ctl.target());
    println!("  APPLIES:      {}", control.frequencies.len() + control.levels.len() + control.governors.len());
    println!("  AFFINITY:     {} HINTS", control.affinities.len());
    if let (Mode::Granular(t), Some(cur)) = (ctl.mode(), ctl.current()) {
        let khz = t.khz(cur).unwrap_or(0);
        let needed = predict_frequency(khz, last_util, ctl.config().target_util);
        println!("  CLOCK:        {} KHZ (UTIL {}%, {} KHZ FOR {}% TARGET)",
            khz, last_util, needed, ctl.config().target_util);
    }
    Ok(())
}
