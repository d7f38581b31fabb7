//! Sharded memory-order computation for Mealy automata.
//!
//! The memory order of an automaton is the smallest `m` such that any `m`
//! consecutive input/output pairs determine the state the automaton is in.
//! This crate computes it by growing, for every state, the set of length-`m`
//! histories that end in that state, and testing those sets for pairwise
//! disjointness. The sets live in an external set store (Redis, or an
//! in-process stand-in) so they never have to fit in memory at once.
//!
//! ## Architecture
//!
//! ```text
//! MemoryEngine::compute
//!   └─ RunContext (one connection per worker, cancellation token)
//!        ├─ extension::initialize / extension::extend  ── sharded over states
//!        ├─ checker::check                             ── sharded over pairs
//!        └─ TraceSets ── Connection (retry + backoff) ── Backend
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mealy_memory::{EngineConfig, MemoryEngine, MemoryOrder};
//! use mealy_memory_core::{Minimized, ShiftRegister};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let register = ShiftRegister::from_bits(2, "01010101", "00001111")?;
//! let engine = MemoryEngine::in_memory(EngineConfig::default());
//! let report = engine.compute(Arc::new(Minimized::new(register)?)).await?;
//! assert_eq!(report.memory, MemoryOrder::Finite(2));
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod extension;
pub mod pool;
pub mod retry;
pub mod store;
pub mod trace_sets;

pub use checker::CheckOutcome;
pub use config::EngineConfig;
pub use context::RunContext;
pub use driver::{DriverPhase, MemoryEngine, MemoryOrder, MemoryReport, OrderStats};
pub use error::{MemoryError, MemoryResult, StoreError, StoreResult};
pub use extension::ExtensionOutcome;
pub use pool::{contiguous_shards, ConnectionPool, Shard};
pub use retry::BackoffPolicy;
pub use store::{Backend, Command, Connection, MemoryBackend, RawConnection, Reply};
#[cfg(feature = "redis")]
pub use store::RedisBackend;
pub use trace_sets::{TraceCursor, TraceSets};
