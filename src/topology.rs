// CPUSCALE TOPOLOGY MODEL
// CLUSTER CLASSIFICATION (LITTLE/BIG/PRIME) AND THE PERFSTATE LADDER
//
// ON MULTI-CLUSTER SOCS THE ENGINE DOES NOT PIN FREQUENCIES. EACH RUNG OF THE
// LADDER PICKS A GOVERNOR PER CLUSTER AND AN AFFINITY HINT FOR THE EMULATION
// THREAD, SO THE KERNEL KEEPS DOING THE FINE-GRAINED SCALING:
//
//   LITTLE powersave -> LITTLE schedutil -> LITTLE performance
//   -> BIG powersave -> BIG schedutil -> BIG performance
//   -> PRIME powersave -> ... (TRI-CLUSTER ONLY)

use std::sync::OnceLock;

use regex::Regex;

use crate::tuning::{
    GOVERNORS_PER_CLUSTER, MAX_CLUSTERS, MAX_FREQS_PER_CLUSTER, MAX_PERF_STATES, PRIME_GAP_PCT,
};

// CLUSTER KIND

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClusterKind {
    Little = 0,
    Big = 1,
    Prime = 2,
}

impl ClusterKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Little => "LITTLE",
            Self::Big => "BIG",
            Self::Prime => "PRIME",
        }
    }
}

// GOVERNOR

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Governor {
    Powersave = 0,
    Schedutil = 1,
    Performance = 2,
}

impl Governor {
    pub fn from_step(step: usize) -> Self {
        match step {
            0 => Self::Powersave,
            1 => Self::Schedutil,
            _ => Self::Performance,
        }
    }

    // LITERAL SYSFS GOVERNOR NAMES
    pub fn name(self) -> &'static str {
        match self {
            Self::Powersave => "powersave",
            Self::Schedutil => "schedutil",
            Self::Performance => "performance",
        }
    }
}

// CLUSTER

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    pub policy_id: u32,
    pub cpu_mask: u32,
    pub cpu_count: u32,
    pub frequencies: Vec<u32>,
    pub min_khz: u32,
    pub max_khz: u32,
    pub kind: ClusterKind,
}

impl Cluster {
    // FREQUENCIES ARE SORTED AND CAPPED. KIND IS PROVISIONAL UNTIL classify_clusters.
    pub fn new(policy_id: u32, cpu_mask: u32, mut frequencies: Vec<u32>, min_khz: u32, max_khz: u32) -> Self {
        frequencies.sort_unstable();
        frequencies.dedup();
        frequencies.truncate(MAX_FREQS_PER_CLUSTER);
        Self {
            policy_id,
            cpu_mask,
            cpu_count: cpu_mask.count_ones(),
            frequencies,
            min_khz,
            max_khz,
            kind: ClusterKind::Little,
        }
    }
}

// PERF STATE: ONE RUNG OF THE LADDER

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerfState {
    pub governors: Vec<Governor>,
    pub active_cluster: usize,
    pub affinity_mask: u32,
}

// TOPOLOGY

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    clusters: Vec<Cluster>,
    states: Vec<PerfState>,
}

impl Topology {
    // SORT BY MAX_KHZ, CAP, CLASSIFY, BUILD LADDER.
    pub fn from_clusters(mut clusters: Vec<Cluster>) -> Self {
        clusters.sort_by_key(|c| c.max_khz);
        clusters.truncate(MAX_CLUSTERS);
        classify_clusters(&mut clusters);
        let states = build_perf_states(&clusters);
        Self { clusters, states }
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn states(&self) -> &[PerfState] {
        &self.states
    }

    pub fn state(&self, idx: usize) -> Option<&PerfState> {
        self.states.get(idx)
    }

    // EMPTY LADDER MEANS TOPOLOGY MODE IS OFF
    pub fn is_active(&self) -> bool {
        !self.states.is_empty()
    }

    pub fn max_state(&self) -> usize {
        self.states.len().saturating_sub(1)
    }
}

// CLASSIFICATION
// INPUT MUST BE SORTED ASCENDING BY max_khz.
//   [0]      LITTLE
//   [N-1]    PRIME IF SINGLE CPU OR >PRIME_GAP_PCT FASTER THAN [N-2], ELSE BIG
//   INTERIOR BIG
pub fn classify_clusters(clusters: &mut [Cluster]) {
    let count = clusters.len();
    for i in 0..count {
        let kind = if i == 0 {
            ClusterKind::Little
        } else if i == count - 1 {
            let prev_max = clusters[i - 1].max_khz as u64;
            let cur_max = clusters[i].max_khz as u64;
            let gap_pct = if prev_max > 0 {
                cur_max.saturating_sub(prev_max) * 100 / prev_max
            } else {
                0
            };
            if clusters[i].cpu_count == 1 || gap_pct > PRIME_GAP_PCT as u64 {
                ClusterKind::Prime
            } else {
                ClusterKind::Big
            }
        } else {
            ClusterKind::Big
        };
        clusters[i].kind = kind;
    }
}

// (LOW, MID, HIGH) = (freqs[0], freqs[len/2], freqs[len-1]). ZEROS WHEN EMPTY.
pub fn pick_representative_freqs(cluster: &Cluster) -> (u32, u32, u32) {
    let f = &cluster.frequencies;
    match (f.first(), f.last()) {
        (Some(&low), Some(&high)) => (low, f[f.len() / 2], high),
        _ => (0, 0, 0),
    }
}

// LADDER CONSTRUCTION
// 3 STATES PER CLUSTER, ASCENDING. ACTIVE CLUSTER GETS THE STEP'S GOVERNOR,
// EVERY OTHER CLUSTER POWERSAVE. THE TOP (PRIME) TIER ON A 3+ CLUSTER PART ALSO
// ADMITS THE BIG CPUS SO THE SCHEDULER HAS HEADROOM.
pub fn build_perf_states(clusters: &[Cluster]) -> Vec<PerfState> {
    let count = clusters.len();
    if count <= 1 {
        return Vec::new();
    }

    let mut states = Vec::with_capacity((count * GOVERNORS_PER_CLUSTER).min(MAX_PERF_STATES));
    'outer: for active in 0..count {
        let widen = active == count - 1 && count >= 3 && clusters[active].kind == ClusterKind::Prime;
        for step in 0..GOVERNORS_PER_CLUSTER {
            if states.len() >= MAX_PERF_STATES {
                break 'outer;
            }
            let governors = (0..count)
                .map(|i| if i == active { Governor::from_step(step) } else { Governor::Powersave })
                .collect();
            let mut affinity_mask = clusters[active].cpu_mask;
            if widen {
                affinity_mask |= clusters[1..active]
                    .iter()
                    .filter(|c| c.kind == ClusterKind::Big)
                    .fold(0, |m, c| m | c.cpu_mask);
            }
            states.push(PerfState { governors, active_cluster: active, affinity_mask });
        }
    }
    states
}

// CPU LIST PARSER
// "0-3,7" -> (0b1000_1111, 5). ANYTHING THAT IS NOT A NUMBER OR RANGE IS SKIPPED;
// CPUS >= 32 DO NOT FIT THE MASK AND ARE DROPPED.
pub fn parse_cpu_list(s: &str) -> (u32, u32) {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    let re = RANGE.get_or_init(|| Regex::new(r"(\d+)(?:-(\d+))?").unwrap());

    let mut mask = 0u32;
    for cap in re.captures_iter(s) {
        let Some(start) = cap.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let end = match cap.get(2) {
            Some(m) => match m.as_str().parse::<u32>() {
                Ok(e) => e,
                Err(_) => continue,
            },
            None => start,
        };
        for cpu in start..=end.min(31) {
            mask |= 1 << cpu;
        }
    }
    (mask, mask.count_ones())
}
