// CPUSCALE DECISION ENGINE
// PER-FRAME STATE MACHINE. RUNS ON THE EMULATION THREAD, ONCE PER FRAME.
// NO I/O, NO BLOCKING: THE WORST CASE IS ONE 64-SAMPLE SORT PER WINDOW.
//
//   SKIP   DISABLED / FAST-FORWARD / MENU / STARTUP GRACE
//   PANIC  AUDIO UNDERRUN. BYPASSES WINDOWING, REACTS WITHIN ONE FRAME
//   BOOST  >util_high FOR boost_windows CONSECUTIVE WINDOWS
//   REDUCE <util_low FOR reduce_windows WINDOWS, COOLDOWN OVER, AUDIO BUFFER HEALTHY
//   NONE   EVERYTHING ELSE
//
// THE ENGINE ONLY MOVES THE TARGET. THE ScalingWorker THREAD (apply.rs) SEES
// target != current AND DOES THE SLOW SYSFS WORK.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::apply::{ScalingWorker, SharedTargets};
use crate::failsafe::{Grace, PanicCounters};
use crate::freq::FrequencyTable;
use crate::timing::{utilization, FrameTimes};
use crate::topology::Topology;
use crate::tuning::{
    frame_budget_us, Config, Level, DEFAULT_FRAME_BUDGET_US, MIN_WINDOW_SAMPLES,
    PANIC_COOLDOWN_WINDOWS, STABILITY_DECAY_WINDOWS,
};

// --- MODE ---
// CHOSEN ONCE FROM DETECTED HARDWARE. THE TARGET/CURRENT PAIR IN SharedTargets
// ADDRESSES WHICHEVER SPACE THE MODE OWNS: LADDER INDEX, FREQUENCY INDEX OR LEVEL.

#[derive(Clone, Debug)]
pub enum Mode {
    Disabled,
    Fallback,
    Granular(FrequencyTable),
    Topology(Topology),
}

impl Mode {
    // MULTI-CLUSTER LADDER WINS, THEN >=2 FREQUENCIES, ELSE NOTHING TO SCALE
    pub fn detect(topology: Option<Topology>, raw_khz: &[u32], config: &Config) -> Self {
        if let Some(topo) = topology.filter(Topology::is_active) {
            info!(clusters = topo.clusters().len(), states = topo.states().len(), "topology mode");
            return Self::Topology(topo);
        }
        match FrequencyTable::detect(raw_khz, config.min_freq_khz) {
            Some(table) => {
                info!(
                    count = table.len(),
                    raw = raw_khz.len(),
                    powersave = table.preset_index(Level::Powersave),
                    normal = table.preset_index(Level::Normal),
                    "granular mode"
                );
                Self::Granular(table)
            }
            None => {
                info!(raw = raw_khz.len(), "scaling disabled: nothing to scale");
                Self::Disabled
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Fallback => "fallback",
            Self::Granular(_) => "granular",
            Self::Topology(_) => "topology",
        }
    }

    pub fn max_target(&self) -> usize {
        match self {
            Self::Disabled => 0,
            Self::Fallback => Level::MAX,
            Self::Granular(t) => t.max_index(),
            Self::Topology(t) => t.max_state(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

// --- PER-FRAME I/O ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Decision {
    None,
    Boost,
    Reduce,
    Panic,
    Skip,
}

impl Decision {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Boost => "BOOST",
            Self::Reduce => "REDUCE",
            Self::Panic => "PANIC",
            Self::Skip => "SKIP",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInput {
    pub fast_forward: bool,
    pub show_menu: bool,
    // MONOTONIC UNDERRUN COUNTER FROM THE AUDIO LAYER
    pub underruns: u32,
    pub buffer_fill_pct: u32,
}

// TELEMETRY FOR DEBUG OVERLAYS. target IS THE INDEX/LEVEL AFTER THIS CALL.
#[derive(Clone, Copy, Debug)]
pub struct Outcome {
    pub decision: Decision,
    pub target: usize,
    pub utilization: u32,
    pub p90_us: u64,
}

impl Outcome {
    fn idle(target: usize) -> Self {
        Self { decision: Decision::None, target, utilization: 0, p90_us: 0 }
    }

    fn skip(target: usize) -> Self {
        Self { decision: Decision::Skip, ..Self::idle(target) }
    }
}

// --- CONTROLLER ---

pub struct Controller {
    config: Config,
    mode: Arc<Mode>,
    shared: Arc<SharedTargets>,

    frames: FrameTimes,
    frame_budget_us: u64,

    panics: PanicCounters,
    grace: Grace,

    frame_count: u32,
    high_windows: u32,
    low_windows: u32,
    last_underrun: u32,
    startup_frames: u32,
    panic_cooldown: u32,
    stability_streak: u32,
}

impl Controller {
    // TARGET STARTS AT THE TOP SO THE STARTUP GRACE RUNS AT FULL SPEED.
    // CURRENT STARTS UNAPPLIED; THE WORKER'S FIRST POLL APPLIES IT.
    pub fn new(config: Config, mode: Mode) -> Self {
        let shared = Arc::new(SharedTargets::new(mode.max_target()));
        Self {
            config,
            mode: Arc::new(mode),
            shared,
            frames: FrameTimes::new(),
            frame_budget_us: DEFAULT_FRAME_BUDGET_US,
            panics: PanicCounters::new(),
            grace: Grace::default(),
            frame_count: 0,
            high_windows: 0,
            low_windows: 0,
            last_underrun: 0,
            startup_frames: 0,
            panic_cooldown: 0,
            stability_streak: 0,
        }
    }

    // NEW EMULATION SESSION. DETECTED HARDWARE AND TARGET/CURRENT SURVIVE.
    pub fn reset(&mut self, fps: f64, underruns: u32) {
        self.frame_count = 0;
        self.high_windows = 0;
        self.low_windows = 0;
        self.last_underrun = underruns;
        self.startup_frames = 0;
        self.panic_cooldown = 0;
        self.stability_streak = 0;
        self.grace.clear();
        self.panics.clear();
        self.frames.clear();
        self.frame_budget_us = frame_budget_us(fps);

        debug!(
            budget_us = self.frame_budget_us,
            fps,
            mode = self.mode.name(),
            "session reset"
        );
    }

    // CALLED AFTER EVERY core.run() WITH ITS EXECUTION TIME
    pub fn record_frame_time(&mut self, us: u64) {
        self.frames.push(us);
    }

    pub fn update(&mut self, input: &FrameInput) -> Outcome {
        let target = self.shared.target();

        if self.mode.is_disabled() || input.fast_forward || input.show_menu {
            return Outcome::skip(target);
        }

        if self.startup_frames < self.config.startup_grace {
            self.startup_frames += 1;
            if self.startup_frames == self.config.startup_grace {
                debug!("startup grace complete, monitoring active");
            }
            return Outcome::skip(target);
        }

        self.grace.tick();

        // UNDERRUN PATH
        let max = self.mode.max_target();
        let underrun = input.underruns > self.last_underrun;
        // RESYNC ON EVERY CHANGE: A COUNTER THAT WENT BACKWARDS WAS RESET UPSTREAM
        self.last_underrun = input.underruns;

        if underrun && self.grace.is_active() {
            self.grace.tally_underrun();
        }
        if underrun && target < max && self.grace.allows_panic() {
            return self.panic(target, max, input.buffer_fill_pct);
        }

        // WINDOW PATH
        self.frame_count += 1;
        if self.frame_count < self.config.window_frames {
            return Outcome::idle(target);
        }

        if self.frames.sample_count() < MIN_WINDOW_SAMPLES {
            self.frame_count = 0;
            return Outcome::idle(target);
        }

        let p90_us = self.frames.p90();
        let util = utilization(p90_us, self.frame_budget_us);
        let mut out = Outcome { utilization: util, p90_us, ..Outcome::idle(target) };

        self.panic_cooldown = self.panic_cooldown.saturating_sub(1);

        if let Some((decision, next)) = self.hysteresis(target, max, util, input.buffer_fill_pct) {
            self.shared.set_target(next);
            out.decision = decision;
            out.target = next;
            debug!(
                decision = decision.label(),
                from = target,
                to = next,
                util,
                p90_us,
                audio = input.buffer_fill_pct,
                mode = self.mode.name(),
                "scaling step"
            );
        }

        // NO PANIC THIS CALL -> ONE MORE STABLE WINDOW
        self.stability_streak += 1;
        if self.stability_streak >= STABILITY_DECAY_WINDOWS {
            if let Mode::Granular(table) = &*self.mode {
                self.panics.decay_from(target, table.len());
            }
            self.stability_streak = 0;
        }

        self.frame_count = 0;
        out
    }

    fn panic(&mut self, target: usize, max: usize, audio: u32) -> Outcome {
        let next = (target + self.config.panic_step_up).min(max);

        if let Mode::Granular(table) = &*self.mode {
            if self.panics.record_panic(target) {
                warn!(
                    khz = table.khz(target).unwrap_or(0),
                    index = target,
                    audio,
                    "blocking frequency and below after repeated panics"
                );
            }
        }

        self.shared.set_target(next);
        self.high_windows = 0;
        self.low_windows = 0;
        self.stability_streak = 0;
        self.panic_cooldown = PANIC_COOLDOWN_WINDOWS;
        self.grace.arm();

        warn!(from = target, to = next, audio, mode = self.mode.name(), "PANIC: audio underrun");

        Outcome { decision: Decision::Panic, ..Outcome::idle(next) }
    }

    // SHARED WINDOW COUNTERS, MODE-SPECIFIC STEP. BOTH TRANSITIONS CLEAR THE
    // OPPOSITE COUNTER. EVERY STEP IS ONE RUNG; ONLY PANIC JUMPS FURTHER.
    fn hysteresis(&mut self, target: usize, max: usize, util: u32, audio: u32) -> Option<(Decision, usize)> {
        let cfg = self.config;

        if util > cfg.util_high {
            self.high_windows += 1;
            self.low_windows = 0;
            if self.high_windows >= cfg.boost_windows && target < max {
                self.high_windows = 0;
                // NEW CLOCK NEEDS SETTLING TIME BEFORE UNDERRUNS MEAN ANYTHING
                self.grace.arm();
                return Some((Decision::Boost, target + 1));
            }
        } else if util < cfg.util_low {
            self.low_windows += 1;
            self.high_windows = 0;
            let reduce_ok = self.low_windows >= cfg.reduce_windows
                && self.panic_cooldown == 0
                && target > 0
                && audio >= cfg.min_buffer_for_reduce;
            if reduce_ok {
                // NO GRACE ON REDUCE: AN UNDERRUN AFTER SLOWING DOWN IS THE SIGNAL
                let next = match &*self.mode {
                    Mode::Granular(_) => self.panics.next_unblocked_below(target),
                    Mode::Topology(_) => Some(target.saturating_sub(cfg.max_step_down.max(1))),
                    Mode::Fallback | Mode::Disabled => Some(target - 1),
                };
                if let Some(next) = next {
                    self.low_windows = 0;
                    return Some((Decision::Reduce, next));
                }
            }
        } else {
            self.high_windows = 0;
            self.low_windows = 0;
        }
        None
    }

    // --- QUERIES ---

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn mode_name(&self) -> &'static str {
        self.mode.name()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn target(&self) -> usize {
        self.shared.target()
    }

    pub fn current(&self) -> Option<usize> {
        self.shared.current()
    }

    // MANUAL OVERRIDE (E.G. FRONTEND PRESETS). CLAMPED TO THE MODE'S RANGE.
    pub fn set_target(&self, idx: usize) {
        self.shared.set_target(idx.min(self.mode.max_target()));
    }

    pub fn frame_budget_us(&self) -> u64 {
        self.frame_budget_us
    }

    pub fn panic_grace(&self) -> u32 {
        self.grace.frames
    }

    pub fn grace_underruns(&self) -> u32 {
        self.grace.underruns
    }

    pub fn panic_cooldown(&self) -> u32 {
        self.panic_cooldown
    }

    pub fn stability_streak(&self) -> u32 {
        self.stability_streak
    }

    pub fn panic_count(&self, idx: usize) -> u32 {
        self.panics.count(idx)
    }

    pub fn frame_times(&self) -> &FrameTimes {
        &self.frames
    }

    // EMULATION THREAD, BETWEEN FRAMES: TAKE THE AFFINITY THE WORKER QUEUED
    // AND APPLY IT TO ITSELF.
    pub fn take_pending_affinity(&self) -> Option<u32> {
        self.shared.take_pending_affinity()
    }

    pub fn worker(&self) -> ScalingWorker {
        ScalingWorker::new(Arc::clone(&self.mode), Arc::clone(&self.shared))
    }

    // UNIFIED 0-100 VIEW ACROSS MODES. None WHEN DISABLED.
    // ONLY TOPOLOGY READS THE TARGET BEFORE THE FIRST APPLY; THE OTHER MODES
    // REPORT THE APPLIED POSITION, WHICH STARTS AT THE BOTTOM.
    pub fn performance_percent(&self) -> Option<u32> {
        let applied = self.shared.current();
        match &*self.mode {
            Mode::Disabled => None,
            Mode::Fallback => Some(applied.unwrap_or(0).min(Level::MAX) as u32 * 50),
            Mode::Granular(_) => Some(scale_percent(applied.unwrap_or(0), self.mode.max_target())),
            Mode::Topology(_) => {
                let pos = applied.unwrap_or_else(|| self.shared.target());
                Some(scale_percent(pos, self.mode.max_target()))
            }
        }
    }
}

fn scale_percent(pos: usize, max: usize) -> u32 {
    if max == 0 {
        return 100;
    }
    (pos.min(max) * 100 / max) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{PANIC_GRACE_FRAMES, PANIC_GRACE_MAX_UNDERRUNS, PANIC_THRESHOLD};

    const FREQS: [u32; 4] = [400_000, 600_000, 800_000, 1_000_000];

    // GRANULAR CONTROLLER, STARTUP GRACE ALREADY CONSUMED, 60FPS BUDGET
    fn granular() -> Controller {
        let cfg = Config::default();
        let mode = Mode::detect(None, &FREQS, &cfg);
        let mut c = Controller::new(cfg, mode);
        c.reset(60.0, 0);
        c.startup_frames = cfg.startup_grace;
        c
    }

    fn fallback() -> Controller {
        let cfg = Config::default();
        let mut c = Controller::new(cfg, Mode::Fallback);
        c.reset(60.0, 0);
        c.startup_frames = cfg.startup_grace;
        c
    }

    // DUAL-CLUSTER LADDER: 6 STATES, TARGET STARTS AT 5
    fn topology() -> Controller {
        use crate::topology::Cluster;

        let cfg = Config::default();
        let topo = Topology::from_clusters(vec![
            Cluster::new(0, 0x0F, vec![500_000, 1_000_000, 1_800_000], 500_000, 1_800_000),
            Cluster::new(4, 0xF0, vec![700_000, 1_500_000, 2_400_000], 700_000, 2_400_000),
        ]);
        let mut c = Controller::new(cfg, Mode::detect(Some(topo), &[], &cfg));
        c.reset(60.0, 0);
        c.startup_frames = cfg.startup_grace;
        c
    }

    fn input(underruns: u32, fill: u32) -> FrameInput {
        FrameInput { fast_forward: false, show_menu: false, underruns, buffer_fill_pct: fill }
    }

    // FILL THE RING WITH us AND POSITION THE WINDOW ONE FRAME FROM COMPLETE
    fn load_window(c: &mut Controller, us: u64) {
        for _ in 0..30 {
            c.record_frame_time(us);
        }
        c.frame_count = c.config.window_frames - 1;
    }

    #[test]
    fn starts_at_top_unapplied() {
        let c = granular();
        assert_eq!(c.target(), 3);
        assert_eq!(c.current(), None);
        assert_eq!(c.mode_name(), "granular");
    }

    #[test]
    fn skips_when_fast_forward_or_menu() {
        let mut c = granular();
        let ff = FrameInput { fast_forward: true, ..input(0, 100) };
        let menu = FrameInput { show_menu: true, ..input(0, 100) };
        assert_eq!(c.update(&ff).decision, Decision::Skip);
        assert_eq!(c.update(&menu).decision, Decision::Skip);
        assert_eq!(c.frame_count, 0);
    }

    #[test]
    fn startup_grace_skips_and_counts() {
        let mut c = granular();
        c.startup_frames = 0;
        assert_eq!(c.update(&input(0, 100)).decision, Decision::Skip);
        assert_eq!(c.startup_frames, 1);
    }

    #[test]
    fn disabled_always_skips() {
        let cfg = Config::default();
        let mut c = Controller::new(cfg, Mode::detect(None, &[1_000_000], &cfg));
        assert_eq!(c.mode_name(), "disabled");
        assert_eq!(c.update(&input(5, 0)).decision, Decision::Skip);
        assert_eq!(c.performance_percent(), None);
    }

    #[test]
    fn panic_scenario_four_freqs() {
        let mut c = granular();
        c.set_target(1);
        let out = c.update(&input(1, 100));
        assert_eq!(out.decision, Decision::Panic);
        assert_eq!(out.target, 2);
        assert_eq!(c.target(), 2);
        assert_eq!(c.panic_cooldown, 8);
        assert_eq!(c.grace.frames, PANIC_GRACE_FRAMES);
        assert_eq!(c.grace.underruns, 0);
        assert_eq!(c.stability_streak, 0);
    }

    #[test]
    fn panic_charges_failed_frequency() {
        let mut c = granular();
        c.set_target(1);
        c.update(&input(1, 100));
        assert_eq!(c.panic_count(1), 1);
        assert_eq!(c.panic_count(2), 0);
    }

    #[test]
    fn panic_clamps_to_max() {
        let mut c = granular();
        c.config.panic_step_up = 10;
        c.set_target(1);
        c.update(&input(1, 100));
        assert_eq!(c.target(), 3);
    }

    #[test]
    fn no_panic_at_max() {
        let mut c = granular();
        let out = c.update(&input(1, 100));
        assert_ne!(out.decision, Decision::Panic);
        assert_eq!(c.target(), 3);
        assert_eq!(c.last_underrun, 1);
    }

    #[test]
    fn repeated_panics_block_and_reduce_skips() {
        let mut c = granular();
        c.panics.set(1, PANIC_THRESHOLD - 1);
        c.set_target(1);
        c.update(&input(1, 100));
        assert!(c.panics.is_blocked(0));
        assert!(c.panics.is_blocked(1));

        // FROM INDEX 2, NOTHING BELOW IS SAFE: NO REDUCE
        c.panic_cooldown = 0;
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        let out = c.update(&input(1, 100));
        assert_eq!(out.decision, Decision::None);
        assert_eq!(c.target(), 2);
    }

    #[test]
    fn reduce_skips_single_blocked_index() {
        let mut c = granular();
        c.set_target(2);
        c.panics.set(1, PANIC_THRESHOLD);
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        let out = c.update(&input(0, 100));
        assert_eq!(out.decision, Decision::Reduce);
        assert_eq!(c.target(), 0);
    }

    #[test]
    fn grace_swallows_underrun() {
        let mut c = granular();
        c.set_target(1);
        c.grace.frames = 30;
        let out = c.update(&input(1, 100));
        assert_ne!(out.decision, Decision::Panic);
        assert_eq!(c.target(), 1);
        assert_eq!(c.grace.underruns, 1);
        assert_eq!(c.grace.frames, 29);
    }

    #[test]
    fn grace_override_on_max_underruns() {
        let mut c = granular();
        c.set_target(1);
        c.grace.frames = 30;
        c.grace.underruns = PANIC_GRACE_MAX_UNDERRUNS - 1;
        let out = c.update(&input(1, 100));
        assert_eq!(out.decision, Decision::Panic);
        assert_eq!(c.target(), 2);
        assert_eq!(c.grace.underruns, 0);
    }

    #[test]
    fn grace_decrements_each_live_call() {
        let mut c = granular();
        c.grace.frames = 10;
        c.update(&input(0, 100));
        assert_eq!(c.grace.frames, 9);
    }

    #[test]
    fn underrun_counter_reset_resyncs() {
        let mut c = granular();
        c.set_target(1);
        c.last_underrun = 50;
        // AUDIO LAYER RESET ITS COUNTER: NOT AN UNDERRUN
        assert_ne!(c.update(&input(0, 100)).decision, Decision::Panic);
        assert_eq!(c.last_underrun, 0);
        assert_eq!(c.update(&input(1, 100)).decision, Decision::Panic);
    }

    #[test]
    fn same_underrun_count_does_not_panic_twice() {
        let mut c = granular();
        c.set_target(0);
        assert_eq!(c.update(&input(1, 100)).decision, Decision::Panic);
        c.grace.clear();
        assert_ne!(c.update(&input(1, 100)).decision, Decision::Panic);
        assert_eq!(c.target(), 1);
    }

    #[test]
    fn waits_for_full_window() {
        let mut c = granular();
        for _ in 0..30 {
            c.record_frame_time(30_000);
        }
        for _ in 0..c.config.window_frames - 1 {
            assert_eq!(c.update(&input(0, 100)).decision, Decision::None);
        }
        assert_eq!(c.frame_count, c.config.window_frames - 1);
    }

    #[test]
    fn too_few_samples_resets_window() {
        let mut c = granular();
        c.record_frame_time(30_000);
        c.frame_count = c.config.window_frames - 1;
        let out = c.update(&input(0, 100));
        assert_eq!(out.decision, Decision::None);
        assert_eq!(c.frame_count, 0);
        assert_eq!(c.stability_streak, 0);
    }

    #[test]
    fn boost_steps_one_and_arms_grace() {
        let mut c = granular();
        c.set_target(0);
        c.high_windows = c.config.boost_windows - 1;
        load_window(&mut c, 15_000);
        let out = c.update(&input(0, 100));
        assert_eq!(out.decision, Decision::Boost);
        assert_eq!(c.target(), 1);
        assert_eq!(c.high_windows, 0);
        assert_eq!(c.grace.frames, PANIC_GRACE_FRAMES);
    }

    #[test]
    fn boost_at_extreme_util_still_one_step() {
        let mut c = granular();
        c.set_target(0);
        c.high_windows = c.config.boost_windows - 1;
        load_window(&mut c, 1_000_000);
        let out = c.update(&input(0, 100));
        assert_eq!(out.utilization, 200);
        assert_eq!(c.target(), 1);
    }

    #[test]
    fn reduce_steps_one_without_grace() {
        let mut c = granular();
        c.set_target(2);
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        let out = c.update(&input(0, 100));
        assert_eq!(out.decision, Decision::Reduce);
        assert_eq!(c.target(), 1);
        assert_eq!(c.grace.frames, 0);
        assert_eq!(c.low_windows, 0);
    }

    #[test]
    fn no_reduce_during_cooldown() {
        let mut c = granular();
        c.set_target(2);
        c.panic_cooldown = 5;
        c.low_windows = c.config.reduce_windows + 3;
        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, 100)).decision, Decision::None);
        assert_eq!(c.target(), 2);
        assert_eq!(c.panic_cooldown, 4);
    }

    #[test]
    fn no_reduce_with_low_buffer() {
        let mut c = granular();
        c.set_target(2);
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, c.config.min_buffer_for_reduce - 1)).decision, Decision::None);
        assert_eq!(c.target(), 2);
    }

    #[test]
    fn sweet_spot_resets_counters() {
        let mut c = granular();
        c.set_target(1);
        c.high_windows = 1;
        c.low_windows = 2;
        load_window(&mut c, 11_500); // ~69%
        assert_eq!(c.update(&input(0, 100)).decision, Decision::None);
        assert_eq!(c.high_windows, 0);
        assert_eq!(c.low_windows, 0);
    }

    #[test]
    fn stability_decays_at_and_above_only() {
        let mut c = granular();
        c.set_target(1);
        c.panics.set(0, 2);
        c.panics.set(1, 2);
        c.panics.set(2, 1);
        c.stability_streak = STABILITY_DECAY_WINDOWS - 1;
        load_window(&mut c, 10_000);
        c.update(&input(0, 100));
        assert_eq!(c.panic_count(0), 2);
        assert_eq!(c.panic_count(1), 1);
        assert_eq!(c.panic_count(2), 0);
        assert_eq!(c.panic_count(3), 0);
        assert_eq!(c.stability_streak, 0);
    }

    #[test]
    fn stability_streak_counts_windows() {
        let mut c = granular();
        load_window(&mut c, 10_000);
        c.update(&input(0, 100));
        assert_eq!(c.stability_streak, 1);
    }

    #[test]
    fn fallback_boost_and_reduce() {
        let mut c = fallback();
        c.set_target(0);
        c.high_windows = c.config.boost_windows - 1;
        load_window(&mut c, 15_000);
        assert_eq!(c.update(&input(0, 100)).decision, Decision::Boost);
        assert_eq!(c.target(), 1);

        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        // FLUSH THE SLOW SAMPLES OUT OF THE RING
        for _ in 0..34 {
            c.record_frame_time(5_000);
        }
        assert_eq!(c.update(&input(0, 100)).decision, Decision::Reduce);
        assert_eq!(c.target(), 0);
    }

    #[test]
    fn fallback_panic() {
        let mut c = fallback();
        c.set_target(0);
        assert_eq!(c.update(&input(1, 100)).decision, Decision::Panic);
        assert_eq!(c.target(), 1);
        assert_eq!(c.panic_count(0), 0);
    }

    #[test]
    fn topology_boost_one_rung_arms_grace() {
        let mut c = topology();
        c.set_target(2);
        c.high_windows = c.config.boost_windows - 1;
        load_window(&mut c, 1_000_000);
        let out = c.update(&input(0, 100));
        assert_eq!(out.decision, Decision::Boost);
        assert_eq!(c.target(), 3);
        assert_eq!(c.grace.frames, PANIC_GRACE_FRAMES);
    }

    #[test]
    fn topology_reduce_by_max_step_down() {
        let mut c = topology();
        c.config.max_step_down = 2;
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, 100)).decision, Decision::Reduce);
        assert_eq!(c.target(), 3);
        assert_eq!(c.grace.frames, 0);

        // STEP LARGER THAN THE REMAINING LADDER CLAMPS AT THE BOTTOM
        c.set_target(1);
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, 100)).decision, Decision::Reduce);
        assert_eq!(c.target(), 0);
    }

    #[test]
    fn topology_panic_clamps_to_top_state() {
        let mut c = topology();
        c.config.panic_step_up = 10;
        c.set_target(1);
        let out = c.update(&input(1, 100));
        assert_eq!(out.decision, Decision::Panic);
        assert_eq!(c.target(), 5);
        assert_eq!(c.panic_cooldown, PANIC_COOLDOWN_WINDOWS);
        // LADDER INDICES ARE NOT FREQUENCIES: NOTHING GETS CHARGED
        assert_eq!(c.panic_count(1), 0);
    }

    #[test]
    fn topology_reduce_gated_by_cooldown_and_buffer() {
        let mut c = topology();
        c.panic_cooldown = 2;
        c.low_windows = c.config.reduce_windows - 1;
        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, 100)).decision, Decision::None);
        assert_eq!(c.target(), 5);

        c.panic_cooldown = 0;
        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, c.config.min_buffer_for_reduce - 1)).decision, Decision::None);
        assert_eq!(c.target(), 5);

        load_window(&mut c, 5_000);
        assert_eq!(c.update(&input(0, c.config.min_buffer_for_reduce)).decision, Decision::Reduce);
        assert_eq!(c.target(), 4);
    }

    #[test]
    fn reset_clears_session_state() {
        let mut c = granular();
        c.frame_count = 10;
        c.high_windows = 1;
        c.low_windows = 2;
        c.panic_cooldown = 4;
        c.panics.set(0, 3);
        c.record_frame_time(123);
        c.set_target(1);
        c.reset(50.0, 7);
        assert_eq!(c.frame_count, 0);
        assert_eq!(c.high_windows, 0);
        assert_eq!(c.low_windows, 0);
        assert_eq!(c.panic_cooldown, 0);
        assert_eq!(c.startup_frames, 0);
        assert_eq!(c.last_underrun, 7);
        assert_eq!(c.panic_count(0), 0);
        assert_eq!(c.frame_times().cursor(), 0);
        assert_eq!(c.frame_budget_us(), 20_000);
        assert_eq!(c.target(), 1);
    }

    #[test]
    fn performance_percent_per_mode() {
        use crate::control::Recorder;

        let c = granular();
        c.set_target(1);
        // NOTHING APPLIED YET: GRANULAR REPORTS THE BOTTOM, NOT THE TARGET
        assert_eq!(c.performance_percent(), Some(0));
        c.worker().poll_once(&mut Recorder::new()).unwrap();
        assert_eq!(c.performance_percent(), Some(33));

        let f = fallback();
        f.set_target(1);
        assert_eq!(f.performance_percent(), Some(0));
        f.worker().poll_once(&mut Recorder::new()).unwrap();
        assert_eq!(f.performance_percent(), Some(50));

        let t = topology();
        t.set_target(3);
        assert_eq!(t.performance_percent(), Some(60));
    }
}
