//! Worker pool with one store connection per worker.
//!
//! A phase splits an index range into contiguous shards, hands each shard and
//! one connection to a tokio task, and joins every task before returning. The
//! connections come back to the pool for the next phase.

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MemoryError, MemoryResult};
use crate::retry::BackoffPolicy;
use crate::store::{Backend, Connection};

/// A slice of a phase's index space assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Position of the shard in the split, 0-based.
    pub index: usize,
    /// Indices this worker is responsible for.
    pub range: Range<u64>,
}

/// Split `0..len` into at most `workers` contiguous, non-empty ranges whose
/// sizes differ by at most one.
pub fn contiguous_shards(len: u64, workers: usize) -> Vec<Range<u64>> {
    if len == 0 {
        return Vec::new();
    }
    let parts = (workers.max(1) as u64).min(len);
    let base = len / parts;
    let extra = len % parts;

    let mut shards = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for part in 0..parts {
        let size = base + u64::from(part < extra);
        shards.push(start..start + size);
        start += size;
    }
    shards
}

/// Parallelism reported by the OS, or 1 if unknown.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Fixed set of store connections, each used by at most one worker at a time.
pub struct ConnectionPool<B: Backend> {
    connections: Vec<Connection<B>>,
}

impl<B: Backend> ConnectionPool<B> {
    /// Open `size` connections (at least one).
    pub async fn open(backend: Arc<B>, size: usize, policy: &BackoffPolicy) -> MemoryResult<Self> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for id in 0..size {
            connections.push(Connection::open(id, Arc::clone(&backend), policy.clone()).await?);
        }
        debug!(backend = backend.name(), connections = size, "connection_pool_open");
        Ok(Self { connections })
    }

    /// Number of idle connections, i.e. the maximum shard count of a phase.
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Connection used for sequential bookkeeping between phases.
    pub fn primary(&mut self) -> MemoryResult<&mut Connection<B>> {
        self.connections.first_mut().ok_or_else(|| MemoryError::Worker {
            message: "connection pool is empty".to_string(),
        })
    }

    /// Run `job` over `0..len` split into one shard per connection.
    ///
    /// Every worker returns its connection together with its result. A failing
    /// worker cancels `cancel` so siblings can stop at their next boundary; all
    /// workers are joined before the first real error is returned. Results are
    /// in shard order.
    pub async fn run_sharded<T, F, Fut>(
        &mut self,
        phase: &'static str,
        len: u64,
        cancel: &CancellationToken,
        job: F,
    ) -> MemoryResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(Shard, Connection<B>, CancellationToken) -> Fut,
        Fut: Future<Output = (Connection<B>, MemoryResult<T>)> + Send + 'static,
    {
        let shards = contiguous_shards(len, self.connections.len());
        if shards.is_empty() {
            return Ok(Vec::new());
        }

        let mut busy = std::mem::take(&mut self.connections);
        let spare = busy.split_off(shards.len());
        debug!(phase, len, workers = shards.len(), "phase_fork");

        let tasks: Vec<_> = shards
            .into_iter()
            .zip(busy)
            .enumerate()
            .map(|(index, (range, conn))| {
                let token = cancel.clone();
                let work = job(Shard { index, range }, conn, cancel.clone());
                tokio::spawn(async move {
                    let (conn, result) = work.await;
                    if result.is_err() {
                        token.cancel();
                    }
                    (conn, result)
                })
            })
            .collect();

        let joined = join_all(tasks).await;

        let mut outputs = Vec::with_capacity(joined.len());
        let mut failure: Option<MemoryError> = None;
        for (index, outcome) in joined.into_iter().enumerate() {
            match outcome {
                Ok((conn, Ok(value))) => {
                    self.connections.push(conn);
                    outputs.push(value);
                }
                Ok((conn, Err(err))) => {
                    self.connections.push(conn);
                    record(&mut failure, err);
                }
                Err(join_err) => {
                    cancel.cancel();
                    warn!(phase, shard = index, error = %join_err, "worker_lost");
                    record(
                        &mut failure,
                        MemoryError::Worker {
                            message: format!("{phase} shard {index}: {join_err}"),
                        },
                    );
                }
            }
        }
        self.connections.extend(spare);

        match failure {
            Some(err) => {
                warn!(phase, error = %err, "phase_failed");
                Err(err)
            }
            None => {
                debug!(phase, "phase_joined");
                Ok(outputs)
            }
        }
    }
}

/// Keep the first error that explains the failure; `Cancelled` only reports
/// that a sibling failed first.
fn record(slot: &mut Option<MemoryError>, err: MemoryError) {
    let replace = match slot {
        None => true,
        Some(MemoryError::Cancelled) => !matches!(err, MemoryError::Cancelled),
        Some(_) => false,
    };
    if replace {
        *slot = Some(err);
    }
}
