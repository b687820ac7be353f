use std::path::Path;

use anyhow::Result;

use cpuscale::engine::Mode;
use cpuscale::freq::FrequencyTable;
use cpuscale::sysfs::{detect_clusters, detect_frequencies};
use cpuscale::topology::{pick_representative_freqs, Topology};
use cpuscale::tuning::{Config, Level};

pub fn run_probe(root: &Path) -> Result<()> {
    let config = Config::default();
    let clusters = detect_clusters(root);

    println!("CPUSCALE PROBE ({})", root.display());
    if clusters.is_empty() {
        println!("  NO CPUFREQ POLICIES FOUND");
    }

    let raw = detect_frequencies(&clusters);
    let topo = Topology::from_clusters(clusters);

    println!("\n{:<8} {:<8} {:<8} {:<6} {:<24}", "POLICY", "KIND", "MASK", "CPUS", "LOW/MID/HIGH (KHZ)");
    println!("{}", "-".repeat(60));
    for c in topo.clusters() {
        let (lo, mid, hi) = pick_representative_freqs(c);
        println!("{:<8} {:<8} {:<8} {:<6} {}/{}/{}",
            c.policy_id, c.kind.label(), format!("{:#x}", c.cpu_mask), c.cpu_count, lo, mid, hi);
    }

    if topo.is_active() {
        println!("\n{:<6} {:<8} {:<10} {}", "STATE", "ACTIVE", "AFFINITY", "GOVERNORS");
        println!("{}", "-".repeat(60));
        for (i, s) in topo.states().iter().enumerate() {
            let govs: Vec<&str> = s.governors.iter().map(|g| g.name()).collect();
            println!("{:<6} {:<8} {:<10} {}",
                i, topo.clusters()[s.active_cluster].kind.label(),
                format!("{:#x}", s.affinity_mask), govs.join(" "));
        }
    }

    if let Some(table) = FrequencyTable::detect(&raw, config.min_freq_khz) {
        let list: Vec<String> = table.frequencies().iter().map(|f| f.to_string()).collect();
        println!("\nFREQUENCIES:     {} ({})", table.len(), list.join(" "));
        for level in [Level::Powersave, Level::Normal, Level::Performance] {
            let idx = table.preset_index(level);
            println!("  {:<12}   {} KHZ (INDEX {})", level.label(), table.khz(idx).unwrap_or(0), idx);
        }
    }

    let mode = Mode::detect(topo.is_active().then_some(topo), &raw, &config);
    println!("\nMODE:            {}", mode.name().to_uppercase());
    Ok(())
}
