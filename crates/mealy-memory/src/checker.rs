//! Pairwise disjointness test over the active states of one order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mealy_memory_core::StateId;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::RunContext;
use crate::error::{MemoryError, MemoryResult};
use crate::store::{Backend, Connection};
use crate::trace_sets::TraceSets;

/// Result of checking one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// True iff no two active states share a trace.
    pub sufficient: bool,
    /// A colliding pair, if one was found. Which pair is reported depends on
    /// scheduling when several collide.
    pub witness: Option<(StateId, StateId)>,
    /// Intersection tests actually run.
    pub comparisons: u64,
}

/// Test every pair `i < j` of active states for a shared trace.
///
/// The outer index is split into contiguous shards. Workers stop as soon as
/// any of them finds a collision.
pub async fn check<B: Backend>(
    ctx: &mut RunContext<B>,
    sets: &Arc<TraceSets>,
) -> MemoryResult<CheckOutcome> {
    let active: Arc<Vec<StateId>> = Arc::new(sets.active_states());
    if active.len() < 2 {
        debug!(order = sets.order(), active_states = active.len(), "check_trivial");
        return Ok(CheckOutcome {
            sufficient: true,
            witness: None,
            comparisons: 0,
        });
    }

    let found = Arc::new(AtomicBool::new(false));
    let outer = active.len() as u64 - 1;

    let job_sets = Arc::clone(sets);
    let job_active = Arc::clone(&active);
    let job_found = Arc::clone(&found);
    let (pool, cancel) = ctx.pool_and_token();
    let shards = pool
        .run_sharded("check", outer, cancel, move |shard, mut conn, cancel| {
            let sets = Arc::clone(&job_sets);
            let active = Arc::clone(&job_active);
            let found = Arc::clone(&job_found);
            async move {
                let range = shard.range.start as usize..shard.range.end as usize;
                let result = check_shard(&sets, &active, range, &found, &mut conn, &cancel).await;
                (conn, result)
            }
        })
        .await?;

    let comparisons = shards.iter().map(|(_, n)| n).sum();
    let witness = shards.into_iter().find_map(|(pair, _)| pair);
    let outcome = CheckOutcome {
        sufficient: witness.is_none(),
        witness,
        comparisons,
    };
    debug!(
        order = sets.order(),
        active_states = active.len(),
        comparisons,
        sufficient = outcome.sufficient,
        witness = ?outcome.witness,
        "check_complete"
    );
    Ok(outcome)
}

async fn check_shard<B: Backend>(
    sets: &TraceSets,
    active: &[StateId],
    outer: std::ops::Range<usize>,
    found: &AtomicBool,
    conn: &mut Connection<B>,
    cancel: &CancellationToken,
) -> MemoryResult<(Option<(StateId, StateId)>, u64)> {
    let mut comparisons = 0;
    for i in outer {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }
        for j in i + 1..active.len() {
            if found.load(Ordering::Relaxed) {
                return Ok((None, comparisons));
            }
            comparisons += 1;
            if sets.intersects(conn, active[i], active[j]).await? {
                found.store(true, Ordering::Relaxed);
                return Ok((Some((active[i], active[j])), comparisons));
            }
        }
    }
    Ok((None, comparisons))
}
