//! The memory-order loop.
//!
//! ```text
//! Initializing -> Checking(1) -> Extending(2) -> Checking(2) -> ...
//!                      |                              |
//!                 Converged(m)                  Exhausted (m = bound)
//! ```
//!
//! The loop ends when every pair of active states has disjoint trace sets, or
//! when the automaton's upper bound is reached with a collision still present,
//! which means the memory is infinite.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mealy_memory_core::{Automaton, StateId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checker::check;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::MemoryResult;
use crate::extension::{ensure_unused_namespace, extend, initialize};
use crate::store::{Backend, MemoryBackend};
use crate::trace_sets::TraceSets;

/// Memory order of an automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryOrder {
    /// Any `m` consecutive input/output pairs determine the current state.
    Finite(u64),
    /// No history length up to the bound suffices.
    Infinite,
}

impl MemoryOrder {
    pub fn is_finite(&self) -> bool {
        matches!(self, MemoryOrder::Finite(_))
    }

    /// The order, if finite.
    pub fn value(&self) -> Option<u64> {
        match self {
            MemoryOrder::Finite(m) => Some(*m),
            MemoryOrder::Infinite => None,
        }
    }
}

impl fmt::Display for MemoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOrder::Finite(m) => write!(f, "{m}"),
            MemoryOrder::Infinite => f.write_str("infinite"),
        }
    }
}

/// Where the driver is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverPhase {
    Initializing,
    Extending(u64),
    Checking(u64),
    Converged(u64),
    Exhausted,
}

/// Statistics for one checked order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    pub order: u64,
    pub active_states: usize,
    /// Total size of all trace sets at this order, counted from `SADD`
    /// replies. May be low if the store applied a write whose reply was lost.
    pub traces: u64,
    pub sufficient: bool,
    pub witness: Option<(StateId, StateId)>,
    pub comparisons: u64,
    pub duration: Duration,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub memory: MemoryOrder,
    pub upper_bound: u64,
    pub orders: Vec<OrderStats>,
    pub workers: usize,
    pub final_phase: DriverPhase,
    pub duration: Duration,
}

impl MemoryReport {
    /// Highest order whose trace sets were built.
    pub fn orders_checked(&self) -> u64 {
        self.orders.last().map_or(0, |stats| stats.order)
    }
}

/// Computes memory orders against one store backend.
pub struct MemoryEngine<B: Backend> {
    backend: Arc<B>,
    config: EngineConfig,
}

impl MemoryEngine<MemoryBackend> {
    /// Engine over a fresh in-process store.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(MemoryBackend::new(), config)
    }
}

#[cfg(feature = "redis")]
impl MemoryEngine<crate::store::RedisBackend> {
    /// Engine over the Redis server at `config.redis_url`.
    pub fn redis(config: EngineConfig) -> MemoryResult<Self> {
        let backend = crate::store::RedisBackend::open(&config.redis_url)?;
        Ok(Self::new(backend, config))
    }
}

impl<B: Backend> MemoryEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The store backend, e.g. to inspect retained keys.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Compute the memory order of `automaton`.
    ///
    /// Iterates orders `1..=memory_upper_bound()`. A bound of zero means every
    /// state is equivalent, so the result is `Finite(0)` without touching the
    /// store.
    pub async fn compute(&self, automaton: Arc<dyn Automaton>) -> MemoryResult<MemoryReport> {
        let started = Instant::now();
        let bound = automaton.memory_upper_bound();
        let num_states = automaton.num_states();

        info!(
            automaton = automaton.name(),
            states = num_states,
            inputs = automaton.num_inputs(),
            upper_bound = bound,
            backend = self.backend.name(),
            "memory_run_start"
        );

        if bound == 0 {
            let report = MemoryReport {
                memory: MemoryOrder::Finite(0),
                upper_bound: 0,
                orders: Vec::new(),
                workers: 0,
                final_phase: DriverPhase::Converged(0),
                duration: started.elapsed(),
            };
            info!(memory = %report.memory, orders = 0, "memory_run_complete");
            return Ok(report);
        }

        let mut ctx = RunContext::open(Arc::clone(&self.backend), &self.config, num_states).await?;
        ensure_unused_namespace(&mut ctx, num_states).await?;

        let mut live = Vec::new();
        let run = run_orders(
            &mut ctx,
            &automaton,
            bound,
            self.config.retain_previous_orders,
            &mut live,
        )
        .await;
        let (memory, orders, phase) = match run {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Ok(conn) = ctx.primary() {
                    for sets in &live {
                        sets.discard(conn).await;
                    }
                }
                warn!(
                    automaton = automaton.name(),
                    error = %err,
                    discarded_orders = live.len(),
                    "memory_run_failed"
                );
                return Err(err);
            }
        };

        let report = MemoryReport {
            memory,
            upper_bound: bound,
            orders,
            workers: ctx.workers(),
            final_phase: phase,
            duration: started.elapsed(),
        };
        info!(
            automaton = automaton.name(),
            memory = %report.memory,
            orders = report.orders.len(),
            workers = report.workers,
            elapsed_ms = report.duration.as_millis() as u64,
            "memory_run_complete"
        );
        Ok(report)
    }
}

/// The extend/check loop. `live` holds every order whose sets are still in the
/// store, so the caller can remove them if the loop fails.
async fn run_orders<B: Backend>(
    ctx: &mut RunContext<B>,
    automaton: &Arc<dyn Automaton>,
    bound: u64,
    retain: bool,
    live: &mut Vec<Arc<TraceSets>>,
) -> MemoryResult<(MemoryOrder, Vec<OrderStats>, DriverPhase)> {
    let mut phase = DriverPhase::Initializing;
    debug!(?phase, "driver_phase");
    let mut order_started = Instant::now();
    let first = initialize(ctx, automaton).await?;
    live.push(Arc::clone(&first.sets));
    let mut current = first.sets;
    let mut traces = first.inserted;
    let mut orders = Vec::new();
    let mut order = 1;

    let memory = loop {
        if order > 1 {
            phase = DriverPhase::Extending(order);
            debug!(?phase, "driver_phase");
            order_started = Instant::now();
            let grown = extend(ctx, automaton, &current).await?;
            live.push(Arc::clone(&grown.sets));
            if !retain {
                current.clear(ctx.primary()?).await?;
                live.retain(|sets| !Arc::ptr_eq(sets, &current));
            }
            current = grown.sets;
            traces = grown.inserted;
        }

        phase = DriverPhase::Checking(order);
        debug!(?phase, "driver_phase");
        let outcome = check(ctx, &current).await?;
        let stats = OrderStats {
            order,
            active_states: current.active_count(),
            traces,
            sufficient: outcome.sufficient,
            witness: outcome.witness,
            comparisons: outcome.comparisons,
            duration: order_started.elapsed(),
        };
        info!(
            order,
            active_states = stats.active_states,
            traces,
            sufficient = stats.sufficient,
            witness = ?stats.witness,
            elapsed_ms = stats.duration.as_millis() as u64,
            "memory_order_checked"
        );
        orders.push(stats);

        if outcome.sufficient {
            phase = DriverPhase::Converged(order);
            break MemoryOrder::Finite(order);
        }
        if order >= bound {
            phase = DriverPhase::Exhausted;
            break MemoryOrder::Infinite;
        }
        order += 1;
    };
    debug!(?phase, "driver_phase");

    if !retain {
        current.clear(ctx.primary()?).await?;
        live.clear();
    }
    Ok((memory, orders, phase))
}
