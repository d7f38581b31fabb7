//! Memory order of a small shift register.
//!
//! Runs on the in-process store, or on Redis when `MEALY_MEMORY_REDIS_URL` is
//! set:
//!
//! ```sh
//! RUST_LOG=mealy_memory=debug cargo run --example shift_register_memory
//! ```

use std::sync::Arc;

use anyhow::Result;
use mealy_memory::{EngineConfig, MemoryEngine, MemoryReport};
use mealy_memory_core::{Automaton, Minimized, ShiftRegister};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Feedback is the input bit; the output is the bit about to leave.
    let register = ShiftRegister::from_bits(3, &"01".repeat(8), "00000000 11111111")?;
    let automaton = Minimized::new(register)?;
    tracing::info!(
        classes = automaton.class_count(),
        upper_bound = automaton.memory_upper_bound(),
        "register_minimized"
    );

    let config = EngineConfig::from_env()?;
    let report = if std::env::var_os("MEALY_MEMORY_REDIS_URL").is_some() {
        MemoryEngine::redis(config)?
            .compute(Arc::new(automaton))
            .await?
    } else {
        MemoryEngine::in_memory(config)
            .compute(Arc::new(automaton))
            .await?
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &MemoryReport) {
    println!("memory order: {}", report.memory);
    for stats in &report.orders {
        println!(
            "  m={:<3} active={:<4} traces={:<8} sufficient={}",
            stats.order, stats.active_states, stats.traces, stats.sufficient
        );
    }
    println!("workers: {}, elapsed: {:?}", report.workers, report.duration);
}
