// CPUSCALE DECISION LOG
// RECORDS NON-TRIVIAL ENGINE OUTCOMES FOR THE CLI REPORTS.
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE RECORDING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::engine::{Decision, Outcome};

const MAX_EVENTS: usize = 4096;

#[derive(Clone, Copy)]
pub struct Event {
    pub frame:       u64,
    pub decision:    Decision,
    pub target:      usize,
    pub utilization: u32,
    pub p90_us:      u64,
}

const EMPTY: Event = Event { frame: 0, decision: Decision::None, target: 0, utilization: 0, p90_us: 0 };

pub struct EventLog {
    events: Vec<Event>,
    head:   usize,
    len:    usize,
    counts: [u64; 5],
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: vec![EMPTY; MAX_EVENTS],
            head: 0,
            len: 0,
            counts: [0; 5],
        }
    }

    // EVERY OUTCOME IS COUNTED; ONLY TRANSITIONS ARE STORED
    pub fn record(&mut self, frame: u64, out: &Outcome) {
        self.counts[slot(out.decision)] += 1;
        if matches!(out.decision, Decision::None | Decision::Skip) {
            return;
        }
        self.events[self.head] = Event {
            frame,
            decision: out.decision,
            target: out.target,
            utilization: out.utilization,
            p90_us: out.p90_us,
        };
        self.head = (self.head + 1) % MAX_EVENTS;
        if self.len < MAX_EVENTS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count(&self, decision: Decision) -> u64 {
        self.counts[slot(decision)]
    }

    pub fn iter_chronological(&self) -> impl Iterator<Item = &Event> {
        let start = if self.len < MAX_EVENTS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.events[(start + i) % MAX_EVENTS])
    }

    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }
        println!("\n{:<10} {:<8} {:<8} {:<8} {:<10}", "FRAME", "EVENT", "TARGET", "UTIL%", "P90_US");
        println!("{}", "-".repeat(48));
        for e in self.iter_chronological() {
            println!("{:<10} {:<8} {:<8} {:<8} {:<10}",
                e.frame, e.decision.label(), e.target, e.utilization, e.p90_us);
        }
        if self.len == MAX_EVENTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} EVENTS)", MAX_EVENTS);
        }
    }

    pub fn summary(&self, mode: &str, perf_pct: Option<u32>) {
        println!("\n{}", "=".repeat(40));
        println!("CPUSCALE SUMMARY ({})", mode.to_uppercase());
        println!("{}", "=".repeat(40));
        for d in [Decision::Boost, Decision::Reduce, Decision::Panic, Decision::Skip, Decision::None] {
            println!("  {:<8} {}", d.label(), self.count(d));
        }
        match perf_pct {
            Some(p) => println!("  PERFORMANCE: {}%", p),
            None => println!("  PERFORMANCE: N/A"),
        }
    }
}

fn slot(d: Decision) -> usize {
    match d {
        Decision::None => 0,
        Decision::Boost => 1,
        Decision::Reduce => 2,
        Decision::Panic => 3,
        Decision::Skip => 4,
    }
}
