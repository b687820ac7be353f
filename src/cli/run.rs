// LIVE DAEMON
// THIS THREAD PLAYS THE EMULATION THREAD: BUSY-LOOP "CORE" WORK, FRAME PACING,
// ENGINE UPDATE, AFFINITY TAKE. THE WORKER THREAD OWNS ALL SYSFS WRITES.
// A FRAME THAT BLOWS PAST 1.5X ITS BUDGET COUNTS AS AN AUDIO UNDERRUN.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{info, warn};

use cpuscale::engine::{Controller, FrameInput, Mode};
use cpuscale::event::EventLog;
use cpuscale::freq::FrequencyTable;
use cpuscale::sysfs::{detect_clusters, detect_frequencies, set_current_thread_affinity, SysfsControl};
use cpuscale::topology::Topology;
use cpuscale::tuning::{frame_budget_us, Config};

fn spin_for(us: u64) {
    let end = Instant::now() + Duration::from_micros(us);
    while Instant::now() < end {
        std::hint::spin_loop();
    }
}

pub fn run_daemon(
    root: &Path,
    fps: f64,
    load_pct: u32,
    trust_cache: bool,
    config: Config,
    shutdown: &'static AtomicBool,
) -> Result<()> {
    let clusters = detect_clusters(root);
    let raw = detect_frequencies(&clusters);
    let topo = Topology::from_clusters(clusters);
    let mode = Mode::detect(topo.is_active().then_some(topo), &raw, &config);
    if mode.is_disabled() {
        bail!("nothing to scale under {}", root.display());
    }

    let mut control = SysfsControl::new(root);
    if trust_cache {
        control = control.trust_cache();
    }
    if let Some(table) = FrequencyTable::detect(&raw, config.min_freq_khz) {
        control = control.with_presets(table);
    }

    let mut ctl = Controller::new(config, mode);
    ctl.reset(fps, 0);
    let worker = ctl.worker().spawn(control, shutdown)?;

    let budget_us = frame_budget_us(fps);
    let work_us = budget_us * load_pct.min(100) as u64 / 100;
    let late = Duration::from_micros(budget_us / 2);

    println!("CPUSCALE v{}", env!("CARGO_PKG_VERSION"));
    println!("MODE:            {}", ctl.mode_name().to_uppercase());
    println!("BUDGET:          {} us (work {} us)", budget_us, work_us);
    println!("CPUSCALE IS ACTIVE (CTRL+C TO EXIT)");

    let mut log = EventLog::new();
    let mut underruns = 0u32;
    let mut frame = 0u64;
    let mut last_report = Instant::now();
    let mut deadline = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(mask) = ctl.take_pending_affinity() {
            match set_current_thread_affinity(mask) {
                Ok(()) => info!(mask = format_args!("{mask:#x}"), "emulation thread migrated"),
                Err(e) => warn!(error = %e, "affinity hint not applied"),
            }
        }

        let start = Instant::now();
        spin_for(work_us);
        let core_us = start.elapsed().as_micros() as u64;
        ctl.record_frame_time(core_us);

        deadline += Duration::from_micros(budget_us);
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        } else if now.duration_since(deadline) > late {
            underruns += 1;
            deadline = now;
        }

        let out = ctl.update(&FrameInput {
            fast_forward: false,
            show_menu: false,
            underruns,
            buffer_fill_pct: 100,
        });
        log.record(frame, &out);
        frame += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            let pct = ctl.performance_percent().map_or("-".to_string(), |p| p.to_string());
            println!("frame: {:<8} target: {:<3} current: {:<3} perf: {:>3}% p90: {}us underruns: {}",
                frame,
                ctl.target(),
                ctl.current().map_or("-".to_string(), |c| c.to_string()),
                pct,
                ctl.frame_times().p90(),
                underruns);
            last_report = Instant::now();
        }
    }

    if worker.join().is_err() {
        warn!("worker thread panicked");
    }
    log.summary(ctl.mode_name(), ctl.performance_percent());
    println!("CPUSCALE OUT.");
    Ok(())
}
