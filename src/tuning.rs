// CPUSCALE TUNING TYPES
// PURE-RUST MODULE: NO I/O, NO PLATFORM DEPENDENCIES
// SHARED BY THE ENGINE, THE WORKER, THE CLI AND THE INTEGRATION TESTS

// STORAGE LIMITS

pub const MAX_FREQUENCIES: usize       = 32;
pub const FRAME_BUFFER_SIZE: usize     = 64;   // ~1S OF FRAMES AT 60FPS
pub const MAX_CLUSTERS: usize          = 8;
pub const MAX_PERF_STATES: usize       = 16;
pub const MAX_FREQS_PER_CLUSTER: usize = 16;

// DEFAULT WINDOWING
// ONE WINDOW = 30 FRAMES = ~500MS AT 60FPS

pub const DEFAULT_WINDOW_FRAMES: u32         = 30;
pub const DEFAULT_UTIL_HIGH: u32             = 85;   // BOOST ABOVE THIS
pub const DEFAULT_UTIL_LOW: u32              = 55;   // REDUCE BELOW THIS
pub const DEFAULT_BOOST_WINDOWS: u32         = 2;    // ~1S OF SUSTAINED LOAD
pub const DEFAULT_REDUCE_WINDOWS: u32        = 4;    // ~2S OF SUSTAINED IDLE
pub const DEFAULT_STARTUP_GRACE: u32         = 300;  // ~5S: CORE/ROM LOAD SPIKES
pub const DEFAULT_MIN_FREQ_KHZ: u32          = 0;    // PANIC FAILSAFE HANDLES BAD FREQS
pub const DEFAULT_TARGET_UTIL: u32           = 70;
pub const DEFAULT_MAX_STEP_DOWN: usize       = 1;
pub const DEFAULT_PANIC_STEP_UP: usize       = 1;
pub const DEFAULT_MIN_BUFFER_FOR_REDUCE: u32 = 40;   // AUDIO FILL %

// PANIC FAILSAFE

pub const PANIC_THRESHOLD: u32           = 3;    // BLOCK A FREQUENCY AFTER THIS MANY PANICS
pub const PANIC_COOLDOWN_WINDOWS: u32    = 8;    // ~4S WITHOUT REDUCES AFTER A PANIC
pub const PANIC_GRACE_FRAMES: u32        = 60;   // ~1S SETTLING AFTER A STEP UP
pub const PANIC_GRACE_MAX_UNDERRUNS: u32 = 5;    // GRACE OVERRIDE: CATASTROPHIC FAILURE
pub const STABILITY_DECAY_WINDOWS: u32   = 8;    // ~4S STABLE BEFORE DECAYING PANIC COUNTS

// UTILIZATION

pub const MIN_WINDOW_SAMPLES: usize     = 5;
pub const UTIL_CAP: u32                 = 200;
pub const DEFAULT_FRAME_BUDGET_US: u64  = 16_667;

// TOPOLOGY HEURISTICS
// TUNED ON THE 2- AND 3-CLUSTER SOCS IN THE FLEET. 4+ CLUSTER PARTS ARE UNTESTED.

pub const PRIME_GAP_PCT: u32          = 10;
pub const GOVERNORS_PER_CLUSTER: usize = 3;

// PRESET LEVEL PERCENTAGES OF MAX FREQUENCY

pub const POWERSAVE_PCT: u32   = 55;
pub const NORMAL_PCT: u32      = 80;
pub const PERFORMANCE_PCT: u32 = 100;

// PRESET LEVEL

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Level {
    Powersave = 0,
    Normal = 1,
    Performance = 2,
}

impl Level {
    pub const MAX: usize = 2;

    pub fn from_index(v: usize) -> Self {
        match v {
            0 => Self::Powersave,
            1 => Self::Normal,
            _ => Self::Performance,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Powersave => "POWERSAVE",
            Self::Normal => "NORMAL",
            Self::Performance => "PERFORMANCE",
        }
    }

    pub fn percentage(self) -> u32 {
        match self {
            Self::Powersave => POWERSAVE_PCT,
            Self::Normal => NORMAL_PCT,
            Self::Performance => PERFORMANCE_PCT,
        }
    }
}

// SESSION CONFIG
// BUILT ONCE, NEVER MUTATED WHILE A SESSION RUNS

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub window_frames: u32,
    pub util_high: u32,
    pub util_low: u32,
    pub boost_windows: u32,
    pub reduce_windows: u32,
    pub startup_grace: u32,
    pub min_freq_khz: u32,
    pub target_util: u32,
    pub max_step_down: usize,
    pub panic_step_up: usize,
    pub min_buffer_for_reduce: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_frames: DEFAULT_WINDOW_FRAMES,
            util_high: DEFAULT_UTIL_HIGH,
            util_low: DEFAULT_UTIL_LOW,
            boost_windows: DEFAULT_BOOST_WINDOWS,
            reduce_windows: DEFAULT_REDUCE_WINDOWS,
            startup_grace: DEFAULT_STARTUP_GRACE,
            min_freq_khz: DEFAULT_MIN_FREQ_KHZ,
            target_util: DEFAULT_TARGET_UTIL,
            max_step_down: DEFAULT_MAX_STEP_DOWN,
            panic_step_up: DEFAULT_PANIC_STEP_UP,
            min_buffer_for_reduce: DEFAULT_MIN_BUFFER_FOR_REDUCE,
        }
    }
}

// FRAME BUDGET FROM THE CORE'S DECLARED FPS. NON-POSITIVE FPS MEANS 60.
pub fn frame_budget_us(fps: f64) -> u64 {
    if fps > 0.0 && fps.is_finite() {
        (1_000_000.0 / fps) as u64
    } else {
        DEFAULT_FRAME_BUDGET_US
    }
}
