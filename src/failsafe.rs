// CPUSCALE PANIC FAILSAFE
//
// TWO MECHANISMS:
//   PANIC COUNTERS: ONE PER FREQUENCY INDEX. A FREQUENCY THAT KEEPS CAUSING
//                   UNDERRUNS GETS BLOCKED, AND SO DOES EVERYTHING BELOW IT
//                   (LESS CLOCK CAN'T SUCCEED WHERE MORE CLOCK FAILED).
//                   STABLE WINDOWS DECAY THE COUNTERS AGAIN.
//   GRACE PERIOD:   FRAME COUNTDOWN ARMED ON EVERY STEP UP. UNDERRUNS WHILE THE
//                   NEW CLOCK SETTLES ARE TALLIED, NOT PANICKED ON, UNTIL THE
//                   TALLY HITS PANIC_GRACE_MAX_UNDERRUNS.

use crate::tuning::{MAX_FREQUENCIES, PANIC_GRACE_FRAMES, PANIC_GRACE_MAX_UNDERRUNS, PANIC_THRESHOLD};

// --- PANIC COUNTERS ---

#[derive(Clone, Debug, Default)]
pub struct PanicCounters {
    counts: [u32; MAX_FREQUENCIES],
}

impl PanicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, idx: usize) -> u32 {
        self.counts.get(idx).copied().unwrap_or(0)
    }

    pub fn set(&mut self, idx: usize, count: u32) {
        if let Some(c) = self.counts.get_mut(idx) {
            *c = count;
        }
    }

    pub fn is_blocked(&self, idx: usize) -> bool {
        self.count(idx) >= PANIC_THRESHOLD
    }

    // CHARGE A PANIC TO idx. RETURNS TRUE WHEN THIS PANIC BLOCKED IT
    // (AND EVERY LOWER INDEX WITH IT).
    pub fn record_panic(&mut self, idx: usize) -> bool {
        let Some(c) = self.counts.get_mut(idx) else {
            return false;
        };
        *c += 1;
        if *c < PANIC_THRESHOLD {
            return false;
        }
        for c in &mut self.counts[..=idx] {
            *c = (*c).max(PANIC_THRESHOLD);
        }
        true
    }

    // HIGHEST UNBLOCKED INDEX STRICTLY BELOW from. None IF ALL BLOCKED.
    pub fn next_unblocked_below(&self, from: usize) -> Option<usize> {
        (0..from.min(MAX_FREQUENCIES)).rev().find(|&i| !self.is_blocked(i))
    }

    // STABILITY AT from ONLY PROVES from AND ABOVE ARE SAFE.
    // COUNTERS BELOW from ARE LEFT ALONE.
    pub fn decay_from(&mut self, from: usize, len: usize) {
        let end = len.min(MAX_FREQUENCIES);
        if from >= end {
            return;
        }
        for c in &mut self.counts[from..end] {
            *c = c.saturating_sub(1);
        }
    }

    pub fn clear(&mut self) {
        self.counts = [0; MAX_FREQUENCIES];
    }
}

// --- GRACE PERIOD ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Grace {
    pub frames: u32,
    pub underruns: u32,
}

impl Grace {
    pub fn arm(&mut self) {
        self.frames = PANIC_GRACE_FRAMES;
        self.underruns = 0;
    }

    pub fn is_active(&self) -> bool {
        self.frames > 0
    }

    // CONSUMED ONCE PER LIVE CALL
    pub fn tick(&mut self) {
        self.frames = self.frames.saturating_sub(1);
    }

    pub fn tally_underrun(&mut self) {
        self.underruns += 1;
    }

    pub fn exceeded(&self) -> bool {
        self.underruns >= PANIC_GRACE_MAX_UNDERRUNS
    }

    // AN UNDERRUN MAY PANIC WHEN NO GRACE IS RUNNING OR THE GRACE TALLY OVERFLOWED
    pub fn allows_panic(&self) -> bool {
        !self.is_active() || self.exceeded()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
