// CPUSCALE FRAME TIMING
// FIXED RING OF PER-FRAME EXECUTION TIMES (US). THE WRITE CURSOR NEVER WRAPS;
// ONLY THE STORAGE INDEX DOES, SO THE TOTAL CALL COUNT STAYS RECOVERABLE.
// NO HEAP ALLOCATION ON THE PER-FRAME PATH.

use crate::tuning::{FRAME_BUFFER_SIZE, UTIL_CAP};

#[derive(Clone, Debug)]
pub struct FrameTimes {
    slots: [u64; FRAME_BUFFER_SIZE],
    cursor: u64,
}

impl Default for FrameTimes {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimes {
    pub fn new() -> Self {
        Self {
            slots: [0; FRAME_BUFFER_SIZE],
            cursor: 0,
        }
    }

    // OVERWRITES THE OLDEST SLOT ONCE FULL
    pub fn push(&mut self, frame_time_us: u64) {
        self.slots[(self.cursor % FRAME_BUFFER_SIZE as u64) as usize] = frame_time_us;
        self.cursor += 1;
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn sample_count(&self) -> usize {
        self.cursor.min(FRAME_BUFFER_SIZE as u64) as usize
    }

    // VALID SAMPLES IN STORAGE ORDER (NOT CHRONOLOGICAL -- PERCENTILE DOESN'T CARE)
    pub fn snapshot(&self) -> &[u64] {
        &self.slots[..self.sample_count()]
    }

    pub fn clear(&mut self) {
        self.slots = [0; FRAME_BUFFER_SIZE];
        self.cursor = 0;
    }

    pub fn p90(&self) -> u64 {
        percentile90(self.snapshot())
    }
}

// 90TH PERCENTILE: SORTED COPY, INDEX floor(count*90/100) CLAMPED.
// REPORTS THE SLOW END OF THE WINDOW SO SUSTAINED JUDDER, NOT THE MEAN, DRIVES SCALING.
pub fn percentile90(samples: &[u64]) -> u64 {
    let count = samples.len().min(FRAME_BUFFER_SIZE);
    if count == 0 {
        return 0;
    }

    let mut sorted = [0u64; FRAME_BUFFER_SIZE];
    sorted[..count].copy_from_slice(&samples[..count]);
    let sorted = &mut sorted[..count];
    sorted.sort_unstable();

    let idx = (count * 90 / 100).min(count - 1);
    sorted[idx]
}

// P90 AS % OF FRAME BUDGET, CAPPED AT UTIL_CAP. ZERO BUDGET READS AS 0%.
pub fn utilization(p90_us: u64, frame_budget_us: u64) -> u32 {
    if frame_budget_us == 0 {
        return 0;
    }
    (p90_us.saturating_mul(100) / frame_budget_us).min(UTIL_CAP as u64) as u32
}
