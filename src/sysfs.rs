// CPUSCALE LINUX SYSFS BACKEND
// cpufreq POLICY DISCOVERY AND THE CpuControl IMPLEMENTATION.
//
//   <root>/cpufreq/policyN/related_cpus                    "0-3"
//   <root>/cpufreq/policyN/cpuinfo_{min,max}_freq          kHz
//   <root>/cpufreq/policyN/scaling_available_frequencies   "kHz kHz ..."
//   <root>/cpufreq/policyN/scaling_governor                WRITE
//   <root>/cpufreq/policyN/scaling_setspeed                WRITE (userspace governor)

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::control::{ControlError, CpuControl};
use crate::freq::FrequencyTable;
use crate::topology::{parse_cpu_list, Cluster};
use crate::tuning::Level;

pub const DEFAULT_ROOT: &str = "/sys/devices/system/cpu";

fn read_u32(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

// SKIPS WRITES THAT WOULD NOT CHANGE THE NODE. RETURNS TRUE WHEN WRITTEN.
// force_check_current IGNORES A CACHE HIT AND COMPARES AGAINST THE LIVE NODE,
// SO A VALUE CHANGED BEHIND OUR BACK GETS WRITTEN AGAIN.
fn write_str_if_needed(
    path: &Path,
    value: &str,
    cache: &mut HashMap<PathBuf, String>,
    force_check_current: bool,
) -> io::Result<bool> {
    if !force_check_current && cache.get(path).is_some_and(|last| last == value) {
        return Ok(false);
    }
    if force_check_current {
        if let Ok(cur) = fs::read_to_string(path) {
            if cur.trim() == value {
                cache.insert(path.to_path_buf(), value.to_string());
                return Ok(false);
            }
        }
    }
    fs::write(path, format!("{value}\n"))?;
    cache.insert(path.to_path_buf(), value.to_string());
    Ok(true)
}

// --- DISCOVERY ---

fn policy_dirs(root: &Path) -> Vec<(u32, PathBuf)> {
    let Ok(entries) = fs::read_dir(root.join("cpufreq")) else {
        return Vec::new();
    };
    let mut dirs: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name();
            let id = name.to_str()?.strip_prefix("policy")?.parse().ok()?;
            Some((id, e.path()))
        })
        .collect();
    dirs.sort_by_key(|(id, _)| *id);
    dirs
}

fn read_policy(id: u32, dir: &Path) -> Option<Cluster> {
    let cpus = fs::read_to_string(dir.join("related_cpus")).ok()?;
    let (mask, _) = parse_cpu_list(&cpus);
    if mask == 0 {
        return None;
    }
    let min = read_u32(&dir.join("cpuinfo_min_freq"))?;
    let max = read_u32(&dir.join("cpuinfo_max_freq"))?;

    let mut freqs: Vec<u32> = fs::read_to_string(dir.join("scaling_available_frequencies"))
        .map(|s| s.split_whitespace().filter_map(|t| t.parse().ok()).collect())
        .unwrap_or_default();
    if freqs.is_empty() {
        freqs = vec![min, max];
    }
    Some(Cluster::new(id, mask, freqs, min, max))
}

// ONE Cluster PER READABLE POLICY. UNREADABLE POLICIES ARE SKIPPED.
pub fn detect_clusters(root: &Path) -> Vec<Cluster> {
    policy_dirs(root)
        .into_iter()
        .filter_map(|(id, dir)| {
            let c = read_policy(id, &dir);
            if c.is_none() {
                debug!(policy = id, "skipping unreadable cpufreq policy");
            }
            c
        })
        .collect()
}

// FLAT FREQUENCY LIST FOR GRANULAR MODE: THE UNION OF EVERY POLICY'S LIST
pub fn detect_frequencies(clusters: &[Cluster]) -> Vec<u32> {
    let mut all: Vec<u32> = clusters.iter().flat_map(|c| c.frequencies.iter().copied()).collect();
    all.sort_unstable();
    all.dedup();
    all
}

// --- CONTROL ---

pub struct SysfsControl {
    root: PathBuf,
    policies: Vec<u32>,
    presets: Option<FrequencyTable>,
    cache: HashMap<PathBuf, String>,
    force_check_current: bool,
}

impl SysfsControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let policies = policy_dirs(&root).into_iter().map(|(id, _)| id).collect();
        Self { root, policies, presets: None, cache: HashMap::new(), force_check_current: true }
    }

    // SKIP THE READ-BACK: ASSUME NOTHING ELSE TOUCHES cpufreq THIS SESSION
    pub fn trust_cache(mut self) -> Self {
        self.force_check_current = false;
        self
    }

    // LEVELS MAP TO THIS TABLE'S PRESET FREQUENCIES
    pub fn with_presets(mut self, table: FrequencyTable) -> Self {
        self.presets = Some(table);
        self
    }

    fn node(&self, policy_id: u32, name: &str) -> PathBuf {
        self.root.join("cpufreq").join(format!("policy{policy_id}")).join(name)
    }

    fn write(&mut self, path: PathBuf, value: &str) -> Result<(), ControlError> {
        if !path.exists() {
            return Err(ControlError::Missing { path });
        }
        match write_str_if_needed(&path, value, &mut self.cache, self.force_check_current) {
            Ok(true) => {
                debug!(path = %path.display(), value, "sysfs write");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(source) => Err(ControlError::Write { path, source }),
        }
    }
}

impl CpuControl for SysfsControl {
    fn set_governor(&mut self, policy_id: u32, governor: &str) -> Result<(), ControlError> {
        let path = self.node(policy_id, "scaling_governor");
        self.write(path, governor)
    }

    fn set_thread_affinity(&mut self, cpu_mask: u32) -> Result<(), ControlError> {
        set_current_thread_affinity(cpu_mask)
    }

    // PINS EVERY POLICY. REQUIRES THE userspace GOVERNOR.
    fn set_frequency(&mut self, khz: u32) -> Result<(), ControlError> {
        if self.policies.is_empty() {
            return Err(ControlError::Missing { path: self.root.join("cpufreq") });
        }
        let value = khz.to_string();
        let mut first_err = None;
        for id in self.policies.clone() {
            let path = self.node(id, "scaling_setspeed");
            if let Err(e) = self.write(path, &value) {
                warn!(policy = id, khz, error = %e, "setspeed failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn set_level(&mut self, level: Level) -> Result<(), ControlError> {
        let Some(khz) = self.presets.as_ref().and_then(|t| t.khz(t.preset_index(level))) else {
            return Err(ControlError::Unsupported("set_level without a frequency table"));
        };
        self.set_frequency(khz)
    }
}

// BINDS THE CALLING THREAD (PID 0) TO cpu_mask
pub fn set_current_thread_affinity(cpu_mask: u32) -> Result<(), ControlError> {
    if cpu_mask == 0 {
        return Err(ControlError::Affinity {
            mask: cpu_mask,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        });
    }
    let ret = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        for cpu in 0..32 {
            if cpu_mask & (1 << cpu) != 0 {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        return Err(ControlError::Affinity { mask: cpu_mask, source: io::Error::last_os_error() });
    }
    Ok(())
}
