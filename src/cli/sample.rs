// LOAD SAMPLE VIEW -- PRINTS ONE LINE PER SAMPLING INTERVAL WITH THE RANK EACH
// MODE WOULD CHOOSE. NEVER TOUCHES TOPOLOGY.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use intelliplug::decision::{normalize, DecisionEngine};
use intelliplug::load::{LoadSource, ProcLoad};
use intelliplug::tuning::{OperatingMode, SAMPLING_INTERVAL};

pub fn run_sample(count: Option<u64>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let full = OperatingMode::Full.profile();
    let eco = OperatingMode::Eco.profile();
    let mut full_engine = DecisionEngine::new();
    let mut eco_engine = DecisionEngine::new();
    let mut load = ProcLoad::new();

    println!("{:<8} {:<10} {:<6} {:<6} {:<6} {:<6}",
        "TICK", "RAW", "FULL", "RANK", "ECO", "RANK");

    let mut tick = 0u64;
    while running.load(Ordering::Relaxed) && count.map_or(true, |c| tick < c) {
        let raw = load.sample();
        let full_rank = full_engine.compute_target_rank_with(&full, raw);
        let eco_rank = eco_engine.compute_target_rank_with(&eco, raw);
        println!("{:<8} {:<10} {:<6} {:<6} {:<6} {:<6}",
            tick, raw, normalize(&full, raw), full_rank, normalize(&eco, raw), eco_rank);
        tick += 1;
        std::thread::sleep(SAMPLING_INTERVAL);
    }

    Ok(())
}
