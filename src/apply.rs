// CPUSCALE APPLICATION LAYER
// THE ENGINE WRITES target, THE WORKER APPLIES IT AND WRITES current.
// ZERO MUTEXES: EVERY CROSS-THREAD FIELD IS A SINGLE ATOMIC WITH ONE WRITER.
//
//   target            ENGINE WRITES, WORKER READS
//   current           WORKER WRITES, ANYONE READS
//   pending_affinity  WORKER POSTS, EMULATION THREAD TAKES AND APPLIES TO ITSELF

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::control::{ControlError, CpuControl};
use crate::engine::Mode;
use crate::topology::Topology;
use crate::tuning::Level;

// current BEFORE THE FIRST SUCCESSFUL APPLY
pub const UNAPPLIED: usize = usize::MAX;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("topology mode has no perf-state ladder")]
    NoLadder,

    #[error("set governor {governor} on policy{policy_id}: {source}")]
    Governor {
        policy_id: u32,
        governor: &'static str,
        #[source]
        source: ControlError,
    },

    #[error("set frequency {khz} kHz: {source}")]
    Frequency {
        khz: u32,
        #[source]
        source: ControlError,
    },

    #[error("set level {}: {source}", .level.label())]
    Level {
        level: Level,
        #[source]
        source: ControlError,
    },
}

// --- SHARED TARGETS ---

pub struct SharedTargets {
    target: AtomicUsize,
    current: AtomicUsize,
    // 0 = NOTHING PENDING (AN EMPTY MASK IS NEVER A VALID AFFINITY)
    pending_affinity: AtomicU32,
}

impl SharedTargets {
    pub fn new(target: usize) -> Self {
        Self {
            target: AtomicUsize::new(target),
            current: AtomicUsize::new(UNAPPLIED),
            pending_affinity: AtomicU32::new(0),
        }
    }

    pub fn target(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    pub(crate) fn set_target(&self, idx: usize) {
        self.target.store(idx, Ordering::Relaxed);
    }

    pub fn current(&self) -> Option<usize> {
        match self.current.load(Ordering::Acquire) {
            UNAPPLIED => None,
            idx => Some(idx),
        }
    }

    fn set_current(&self, idx: usize) {
        self.current.store(idx, Ordering::Release);
    }

    // NEWER POSTS REPLACE OLDER ONES; ONLY THE LATEST MASK MATTERS
    pub fn post_affinity(&self, mask: u32) {
        if mask != 0 {
            self.pending_affinity.store(mask, Ordering::Release);
        }
    }

    pub fn take_pending_affinity(&self) -> Option<u32> {
        match self.pending_affinity.swap(0, Ordering::AcqRel) {
            0 => None,
            mask => Some(mask),
        }
    }
}

// --- PERF STATE APPLICATION ---

// WRITES EVERY CLUSTER'S GOVERNOR FOR THE (CLAMPED) TARGET STATE.
// A FAILING CLUSTER DOES NOT STOP THE OTHERS; THE FIRST ERROR IS RETURNED AFTER
// current IS UPDATED SO THE WORKER DOESN'T HAMMER A BROKEN NODE EVERY POLL.
// AFFINITY IS NOT TOUCHED HERE: IT MUST BE APPLIED BY THE EMULATION THREAD.
pub fn apply_perf_state<C: CpuControl + ?Sized>(
    topology: &Topology,
    shared: &SharedTargets,
    control: &mut C,
) -> Result<usize, ApplyError> {
    if !topology.is_active() {
        return Err(ApplyError::NoLadder);
    }

    let idx = shared.target().min(topology.max_state());
    let state = &topology.states()[idx];

    let mut first_err = None;
    for (cluster, &gov) in topology.clusters().iter().zip(&state.governors) {
        if let Err(source) = control.set_governor(cluster.policy_id, gov.name()) {
            warn!(policy = cluster.policy_id, governor = gov.name(), error = %source, "governor write failed");
            first_err.get_or_insert(ApplyError::Governor {
                policy_id: cluster.policy_id,
                governor: gov.name(),
                source,
            });
        }
    }

    shared.set_current(idx);
    debug!(state = idx, active = state.active_cluster, mask = format_args!("{:#x}", state.affinity_mask), "perf state applied");

    match first_err {
        Some(e) => Err(e),
        None => Ok(idx),
    }
}

// --- SCALING WORKER ---

pub struct ScalingWorker {
    mode: Arc<Mode>,
    shared: Arc<SharedTargets>,
}

impl ScalingWorker {
    pub fn new(mode: Arc<Mode>, shared: Arc<SharedTargets>) -> Self {
        Self { mode, shared }
    }

    // ONE POLL: APPLY target IF IT DIFFERS FROM current.
    // Ok(true) WHEN SOMETHING WAS APPLIED.
    pub fn poll_once<C: CpuControl + ?Sized>(&self, control: &mut C) -> Result<bool, ApplyError> {
        let target = self.shared.target();
        if self.shared.current() == Some(target) {
            return Ok(false);
        }

        match &*self.mode {
            Mode::Disabled => Ok(false),
            Mode::Topology(topo) => {
                let result = apply_perf_state(topo, &self.shared, control);
                // THE GOVERNORS THAT DID LAND ARE LIVE: HINT EVEN ON PARTIAL FAILURE
                if let Some(state) = self.shared.current().and_then(|idx| topo.state(idx)) {
                    self.shared.post_affinity(state.affinity_mask);
                }
                result.map(|_| true)
            }
            Mode::Granular(table) => {
                let idx = target.min(table.max_index());
                let Some(khz) = table.khz(idx) else {
                    return Ok(false);
                };
                control
                    .set_frequency(khz)
                    .map_err(|source| ApplyError::Frequency { khz, source })?;
                self.shared.set_current(idx);
                debug!(index = idx, khz, "frequency applied");
                Ok(true)
            }
            Mode::Fallback => {
                let level = Level::from_index(target);
                let result = control.set_level(level);
                self.shared.set_current(level as usize);
                debug!(level = level.label(), "level applied");
                result.map(|_| true).map_err(|source| ApplyError::Level { level, source })
            }
        }
    }

    // POLLS EVERY 50MS UNTIL shutdown. APPLY ERRORS ARE LOGGED, NEVER FATAL.
    pub fn run<C: CpuControl + ?Sized>(&self, control: &mut C, shutdown: &AtomicBool) {
        info!(mode = self.mode.name(), "scaling worker started");
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll_once(control) {
                warn!(error = %e, "apply failed");
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        info!("scaling worker stopped");
    }

    pub fn spawn<C>(self, mut control: C, shutdown: &'static AtomicBool) -> io::Result<JoinHandle<()>>
    where
        C: CpuControl + Send + 'static,
    {
        std::thread::Builder::new()
            .name("cpuscale-worker".into())
            .spawn(move || self.run(&mut control, shutdown))
    }
}
