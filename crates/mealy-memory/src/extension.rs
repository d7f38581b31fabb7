//! Growing trace sets one order at a time.
//!
//! For every active state `s`, input `x` and trace `t` in the set of `s`, the
//! trace `t + (x, λ(s, x))` goes into the next-order set of `δ(s, x)`. Workers
//! own contiguous slices of the active-state list and write without locking;
//! `SADD` makes colliding writes converge.

use std::ops::Range;
use std::sync::Arc;

use mealy_memory_core::{Automaton, StateId, Symbol, Trace};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::RunContext;
use crate::error::{MemoryError, MemoryResult};
use crate::store::{Backend, Connection};
use crate::trace_sets::TraceSets;

/// Sets produced by one extension step.
#[derive(Debug)]
pub struct ExtensionOutcome {
    pub sets: Arc<TraceSets>,
    /// Distinct traces written, i.e. the total size of the new sets.
    ///
    /// Counted from `SADD` replies. A write the store applied but whose reply
    /// was lost is retried, answers 0, and is not counted, so the figure can be
    /// low after transient failures.
    pub inserted: u64,
}

/// Fail with [`MemoryError::StaleKeys`] if any order-1 set already exists
/// under the run's key prefix.
///
/// Every state that is active at some order is active at order 1, so a run
/// that left sets of any order behind also left order-1 sets.
pub async fn ensure_unused_namespace<B: Backend>(
    ctx: &mut RunContext<B>,
    num_states: u64,
) -> MemoryResult<()> {
    let probe = Arc::new(TraceSets::new(1, ctx.key_prefix()));
    let (pool, cancel) = ctx.pool_and_token();
    let found = pool
        .run_sharded("namespace", num_states, cancel, move |shard, mut conn, _| {
            let probe = Arc::clone(&probe);
            async move {
                let result = probe.find_existing(&mut conn, shard.range).await;
                (conn, result)
            }
        })
        .await?;

    match found.into_iter().flatten().next() {
        Some(key) => Err(MemoryError::StaleKeys { key }),
        None => Ok(()),
    }
}

/// Build the order-1 sets from every `(state, input)` pair.
pub async fn initialize<B: Backend>(
    ctx: &mut RunContext<B>,
    automaton: &Arc<dyn Automaton>,
) -> MemoryResult<ExtensionOutcome> {
    validate_alphabet(automaton.as_ref())?;
    let num_states = automaton.num_states();
    let sets = Arc::new(TraceSets::new(1, ctx.key_prefix()));

    let job_sets = Arc::clone(&sets);
    let job_automaton = Arc::clone(automaton);
    let (pool, cancel) = ctx.pool_and_token();
    let result = pool
        .run_sharded("initialize", num_states, cancel, move |shard, mut conn, cancel| {
            let automaton = Arc::clone(&job_automaton);
            let sets = Arc::clone(&job_sets);
            async move {
                let result =
                    initialize_shard(automaton.as_ref(), &sets, &mut conn, shard.range, &cancel)
                        .await;
                (conn, result)
            }
        })
        .await;
    let counts = discard_on_error(ctx, &sets, result).await?;

    let inserted = counts.iter().sum();
    debug!(
        order = 1,
        active_states = sets.active_count(),
        inserted,
        "extension_complete"
    );
    Ok(ExtensionOutcome { sets, inserted })
}

async fn initialize_shard<B: Backend>(
    automaton: &dyn Automaton,
    sets: &TraceSets,
    conn: &mut Connection<B>,
    states: Range<u64>,
    cancel: &CancellationToken,
) -> MemoryResult<u64> {
    let mut inserted = 0;
    for state in states {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }
        for (input, next, output) in moves(automaton, state)? {
            if sets.insert(conn, next, &Trace::single(input, output)).await? {
                inserted += 1;
            }
        }
    }
    Ok(inserted)
}

/// Grow `current` (order m) into a new set of order m + 1.
///
/// `current` is left intact; the caller decides whether to clear it.
pub async fn extend<B: Backend>(
    ctx: &mut RunContext<B>,
    automaton: &Arc<dyn Automaton>,
    current: &Arc<TraceSets>,
) -> MemoryResult<ExtensionOutcome> {
    validate_alphabet(automaton.as_ref())?;
    let order = current.order() + 1;
    let next = Arc::new(TraceSets::new(order, ctx.key_prefix()));
    let active: Arc<Vec<StateId>> = Arc::new(current.active_states());
    let batch_size = ctx.scan_batch();

    let job_current = Arc::clone(current);
    let job_next = Arc::clone(&next);
    let job_active = Arc::clone(&active);
    let job_automaton = Arc::clone(automaton);
    let (pool, cancel) = ctx.pool_and_token();
    let result = pool
        .run_sharded(
            "extend",
            active.len() as u64,
            cancel,
            move |shard, mut conn, cancel| {
                let automaton = Arc::clone(&job_automaton);
                let current = Arc::clone(&job_current);
                let next = Arc::clone(&job_next);
                let active = Arc::clone(&job_active);
                async move {
                    let states = &active[shard.range.start as usize..shard.range.end as usize];
                    let result = extend_shard(
                        automaton.as_ref(),
                        &current,
                        &next,
                        &mut conn,
                        states,
                        batch_size,
                        &cancel,
                    )
                    .await;
                    (conn, result)
                }
            },
        )
        .await;
    let counts = discard_on_error(ctx, &next, result).await?;

    let inserted = counts.iter().sum();
    debug!(
        order,
        active_states = next.active_count(),
        inserted,
        "extension_complete"
    );
    Ok(ExtensionOutcome {
        sets: next,
        inserted,
    })
}

async fn extend_shard<B: Backend>(
    automaton: &dyn Automaton,
    current: &TraceSets,
    next: &TraceSets,
    conn: &mut Connection<B>,
    states: &[StateId],
    batch_size: usize,
    cancel: &CancellationToken,
) -> MemoryResult<u64> {
    let mut inserted = 0;
    for &state in states {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }
        let steps = moves(automaton, state)?;

        let mut cursor = current.iterate(state, batch_size);
        while let Some(batch) = cursor.next_batch(conn).await? {
            for trace in &batch {
                for &(input, successor, output) in &steps {
                    if next
                        .insert(conn, successor, &trace.extended(input, output))
                        .await?
                    {
                        inserted += 1;
                    }
                }
            }
        }
    }
    Ok(inserted)
}

/// Remove the partly written `sets` when their phase failed.
async fn discard_on_error<B: Backend, T>(
    ctx: &mut RunContext<B>,
    sets: &TraceSets,
    result: MemoryResult<T>,
) -> MemoryResult<T> {
    if result.is_err() {
        if let Ok(conn) = ctx.primary() {
            sets.discard(conn).await;
        }
    }
    result
}

/// `(input, successor, output)` for every input symbol of `state`.
fn moves(automaton: &dyn Automaton, state: StateId) -> MemoryResult<Vec<(Symbol, StateId, Symbol)>> {
    let num_states = automaton.num_states();
    (0..automaton.num_inputs())
        .map(|input| {
            let successor = automaton.state_function(state, input);
            if successor >= num_states {
                return Err(MemoryError::contract(format!(
                    "{}: state {state} on input {input} moves to {successor}, \
                     outside 0..{num_states}",
                    automaton.name()
                )));
            }
            Ok((input, successor, automaton.output_function(state, input)))
        })
        .collect()
}

fn validate_alphabet(automaton: &dyn Automaton) -> MemoryResult<()> {
    if automaton.num_states() == 0 || automaton.num_inputs() == 0 {
        return Err(MemoryError::contract(format!(
            "{} has {} states and {} inputs; both must be non-zero",
            automaton.name(),
            automaton.num_states(),
            automaton.num_inputs()
        )));
    }
    Ok(())
}
