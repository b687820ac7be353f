// CPUSCALE PLATFORM CONTROL SURFACE
// THE FOUR PRIMITIVES THE ENGINE'S SIDE EFFECTS GO THROUGH.
// sysfs.rs IMPLEMENTS THEM FOR LINUX; Recorder CAPTURES THEM FOR TESTS AND
// THE OFFLINE SIMULATOR.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tuning::Level;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("no cpufreq node {}", .path.display())]
    Missing { path: PathBuf },

    #[error("sched_setaffinity(mask={mask:#x}): {source}")]
    Affinity { mask: u32, source: io::Error },

    #[error("{0} not supported on this platform")]
    Unsupported(&'static str),

    #[error("injected failure: {0}")]
    Injected(String),
}

pub trait CpuControl {
    // governor IS ONE OF "powersave", "schedutil", "performance"
    fn set_governor(&mut self, policy_id: u32, governor: &str) -> Result<(), ControlError>;

    // BINDS THE CALLING THREAD. ONLY THE EMULATION THREAD CALLS THIS, ON ITSELF.
    fn set_thread_affinity(&mut self, cpu_mask: u32) -> Result<(), ControlError>;

    fn set_frequency(&mut self, _khz: u32) -> Result<(), ControlError> {
        Err(ControlError::Unsupported("set_frequency"))
    }

    fn set_level(&mut self, _level: Level) -> Result<(), ControlError> {
        Err(ControlError::Unsupported("set_level"))
    }
}

// RECORDING CONTROL
// LOGS EVERY CALL. POLICIES IN fail_policies AND fail_frequency INJECT ERRORS.

#[derive(Clone, Debug, Default)]
pub struct Recorder {
    pub governors: Vec<(u32, String)>,
    pub affinities: Vec<u32>,
    pub frequencies: Vec<u32>,
    pub levels: Vec<Level>,
    pub fail_policies: Vec<u32>,
    pub fail_frequency: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CpuControl for Recorder {
    fn set_governor(&mut self, policy_id: u32, governor: &str) -> Result<(), ControlError> {
        self.governors.push((policy_id, governor.to_string()));
        if self.fail_policies.contains(&policy_id) {
            return Err(ControlError::Injected(format!("policy{policy_id}")));
        }
        Ok(())
    }

    fn set_thread_affinity(&mut self, cpu_mask: u32) -> Result<(), ControlError> {
        self.affinities.push(cpu_mask);
        Ok(())
    }

    fn set_frequency(&mut self, khz: u32) -> Result<(), ControlError> {
        self.frequencies.push(khz);
        if self.fail_frequency {
            return Err(ControlError::Injected(format!("{khz} kHz")));
        }
        Ok(())
    }

    fn set_level(&mut self, level: Level) -> Result<(), ControlError> {
        self.levels.push(level);
        Ok(())
    }
}
