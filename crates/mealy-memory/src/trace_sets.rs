//! Per-state trace sets for one memory order.
//!
//! Each state's set lives in the store under `{prefix}{state}_{order}`. The
//! handle itself only remembers which states received at least one trace, so
//! the sets can be far larger than process memory.

use std::collections::HashSet;
use std::ops::Range;

use dashmap::DashSet;
use mealy_memory_core::{StateId, Trace};
use tracing::{debug, warn};

use crate::error::MemoryResult;
use crate::store::{Backend, Connection};

/// Trace sets of every state at a single memory order.
#[derive(Debug)]
pub struct TraceSets {
    order: u64,
    prefix: String,
    active: DashSet<StateId>,
}

impl TraceSets {
    /// Empty sets for `order`, with keys namespaced by `prefix`.
    pub fn new(order: u64, prefix: impl Into<String>) -> Self {
        Self {
            order,
            prefix: prefix.into(),
            active: DashSet::new(),
        }
    }

    /// Memory order (trace length) of these sets.
    pub fn order(&self) -> u64 {
        self.order
    }

    /// Store key of the set belonging to `state`.
    pub fn key(&self, state: StateId) -> String {
        format!("{}{}_{}", self.prefix, state, self.order)
    }

    fn intersection_key(&self, a: StateId, b: StateId) -> String {
        format!("{}{}_{}_{}", self.prefix, a, b, self.order)
    }

    /// Add `trace` to the set of `state`. Returns true if it was new.
    ///
    /// The state is recorded as active before the write, so a failed `SADD`
    /// that the store applied anyway is still removed by [`clear`](Self::clear).
    pub async fn insert<B: Backend>(
        &self,
        conn: &mut Connection<B>,
        state: StateId,
        trace: &Trace,
    ) -> MemoryResult<bool> {
        self.active.insert(state);
        Ok(conn.sadd(&self.key(state), &trace.encode()).await?)
    }

    /// Cursor over the set of `state`, fetched `batch_size` members at a time.
    pub fn iterate(&self, state: StateId, batch_size: usize) -> TraceCursor {
        TraceCursor {
            key: self.key(state),
            cursor: 0,
            finished: false,
            batch_size: batch_size.max(1),
        }
    }

    /// Whether the sets of `a` and `b` share a trace.
    ///
    /// The intersection is computed by the store into a scratch key that is
    /// deleted before returning, also when `EXISTS` fails.
    pub async fn intersects<B: Backend>(
        &self,
        conn: &mut Connection<B>,
        a: StateId,
        b: StateId,
    ) -> MemoryResult<bool> {
        let scratch = self.intersection_key(a, b);
        conn.sinterstore(&scratch, &self.key(a), &self.key(b))
            .await?;
        let found = conn.exists(&scratch).await;
        let removed = conn.del(&scratch).await;
        let found = found?;
        removed?;
        Ok(found)
    }

    /// Whether the store already holds a set for any state in `states`.
    /// Returns the first such key.
    pub async fn find_existing<B: Backend>(
        &self,
        conn: &mut Connection<B>,
        states: Range<StateId>,
    ) -> MemoryResult<Option<String>> {
        for state in states {
            let key = self.key(state);
            if conn.exists(&key).await? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Delete every set of this order. Returns the number of keys removed.
    pub async fn clear<B: Backend>(&self, conn: &mut Connection<B>) -> MemoryResult<usize> {
        let mut removed = 0;
        for state in self.active_states() {
            if conn.del(&self.key(state)).await? {
                removed += 1;
            }
        }
        self.active.clear();
        debug!(order = self.order, removed, "trace_sets_cleared");
        Ok(removed)
    }

    /// [`clear`](Self::clear) on a failure path. Errors are logged, not
    /// returned, so the failure that triggered the cleanup is the one reported.
    pub async fn discard<B: Backend>(&self, conn: &mut Connection<B>) {
        if let Err(err) = self.clear(conn).await {
            warn!(
                order = self.order,
                states = self.active_count(),
                error = %err,
                "trace_sets_discard_failed"
            );
        }
    }

    /// States holding at least one trace, ascending.
    pub fn active_states(&self) -> Vec<StateId> {
        let mut states: Vec<StateId> = self.active.iter().map(|s| *s).collect();
        states.sort_unstable();
        states
    }

    /// Number of states holding at least one trace.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Read the whole set of `state` into memory. Meant for inspection and tests.
    pub async fn collect<B: Backend>(
        &self,
        conn: &mut Connection<B>,
        state: StateId,
        batch_size: usize,
    ) -> MemoryResult<HashSet<Trace>> {
        let mut traces = HashSet::new();
        let mut cursor = self.iterate(state, batch_size);
        while let Some(batch) = cursor.next_batch(conn).await? {
            traces.extend(batch);
        }
        Ok(traces)
    }
}

/// Lazy batch iteration over one trace set.
///
/// The cursor does not own a connection, so the same connection can be used to
/// write into the next order between batches. Members may repeat across
/// batches, as with Redis `SSCAN`.
#[derive(Debug, Clone)]
pub struct TraceCursor {
    key: String,
    cursor: u64,
    finished: bool,
    batch_size: usize,
}

impl TraceCursor {
    /// Fetch the next batch, or `None` once the scan has completed.
    pub async fn next_batch<B: Backend>(
        &mut self,
        conn: &mut Connection<B>,
    ) -> MemoryResult<Option<Vec<Trace>>> {
        if self.finished {
            return Ok(None);
        }

        let (next, members) = conn.sscan(&self.key, self.cursor, self.batch_size).await?;
        self.cursor = next;
        self.finished = next == 0;

        let traces = members
            .iter()
            .map(|member| Trace::decode(member))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(traces))
    }

    /// Start the scan over from the beginning.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.finished = false;
    }
}
