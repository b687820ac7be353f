// CPUSCALE FREQUENCY TABLE
// SORTED AVAILABLE FREQUENCIES (KHZ) + THREE PRESET INDICES
// POPULATED ONCE AT STARTUP, READ-ONLY AFTERWARDS

use crate::tuning::{Level, MAX_FREQUENCIES};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrequencyTable {
    freqs: Vec<u32>,
    presets: [usize; 3],
}

impl FrequencyTable {
    // FILTER BELOW min_floor, SORT, DEDUP, CAP AT MAX_FREQUENCIES.
    // RETURNS None WHEN <=1 FREQUENCY SURVIVES: FLAT HARDWARE, NOTHING TO SCALE.
    pub fn detect(raw: &[u32], min_floor: u32) -> Option<Self> {
        let mut freqs: Vec<u32> = raw.iter().copied().filter(|&f| f >= min_floor).collect();
        freqs.sort_unstable();
        freqs.dedup();
        freqs.truncate(MAX_FREQUENCIES);

        if freqs.len() <= 1 {
            return None;
        }

        let max = freqs[freqs.len() - 1];
        let presets = [
            find_nearest_index(&freqs, pct_of(max, Level::Powersave.percentage())),
            find_nearest_index(&freqs, pct_of(max, Level::Normal.percentage())),
            freqs.len() - 1,
        ];

        Some(Self { freqs, presets })
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn max_index(&self) -> usize {
        self.freqs.len().saturating_sub(1)
    }

    pub fn khz(&self, idx: usize) -> Option<u32> {
        self.freqs.get(idx).copied()
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.freqs
    }

    pub fn preset_index(&self, level: Level) -> usize {
        self.presets[level as usize]
    }
}

fn pct_of(khz: u32, pct: u32) -> u32 {
    (khz as u64 * pct as u64 / 100) as u32
}

// LINEAR SCAN FOR MINIMUM |f - target|. TIES KEEP THE LOWER INDEX.
pub fn find_nearest_index(freqs: &[u32], target_khz: u32) -> usize {
    let mut best_idx = 0;
    let mut best_diff = u32::MAX;
    for (i, &f) in freqs.iter().enumerate() {
        let diff = f.abs_diff(target_khz);
        if diff < best_diff {
            best_diff = diff;
            best_idx = i;
        }
    }
    best_idx
}

pub fn preset_percentage(level: Level) -> u32 {
    level.percentage()
}

// LINEAR PERFORMANCE MODEL: new_freq = freq * util / target_util
pub fn predict_frequency(current_khz: u32, util_pct: u32, target_util_pct: u32) -> u32 {
    if target_util_pct == 0 {
        return current_khz;
    }
    (current_khz as u64 * util_pct as u64 / target_util_pct as u64) as u32
}
