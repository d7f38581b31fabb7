//! Per-run state shared by every phase.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::MemoryResult;
use crate::pool::{available_parallelism, ConnectionPool};
use crate::store::{Backend, Connection};

/// Connections, cancellation flag and tuning values of one engine run.
///
/// Created when a run starts and dropped when it ends; nothing outlives it
/// except retained trace sets.
pub struct RunContext<B: Backend> {
    pool: ConnectionPool<B>,
    cancel: CancellationToken,
    scan_batch: usize,
    key_prefix: String,
}

impl<B: Backend> RunContext<B> {
    /// Open one connection per worker, with at most one worker per state.
    pub async fn open(backend: Arc<B>, config: &EngineConfig, num_states: u64) -> MemoryResult<Self> {
        config.validate()?;
        let parallelism = config.workers.unwrap_or_else(available_parallelism);
        let workers = usize::try_from(num_states)
            .map_or(parallelism, |states| parallelism.min(states))
            .max(1);

        debug!(workers, parallelism, num_states, "run_context_open");
        let pool = ConnectionPool::open(backend, workers, &config.backoff).await?;

        Ok(Self {
            pool,
            cancel: CancellationToken::new(),
            scan_batch: config.scan_batch,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Pool and cancellation token, borrowed together for a sharded phase.
    pub fn pool_and_token(&mut self) -> (&mut ConnectionPool<B>, &CancellationToken) {
        (&mut self.pool, &self.cancel)
    }

    /// Connection for sequential work between phases.
    pub fn primary(&mut self) -> MemoryResult<&mut Connection<B>> {
        self.pool.primary()
    }

    /// Number of workers a phase may use.
    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    pub fn scan_batch(&self) -> usize {
        self.scan_batch
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Whether a worker failure has cancelled the run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    #[tokio::test]
    async fn test_workers_capped_by_state_count() {
        let backend = Arc::new(MemoryBackend::new());
        let config = EngineConfig::fast().with_workers(8);

        let ctx = RunContext::open(Arc::clone(&backend), &config, 3).await.unwrap();
        assert_eq!(ctx.workers(), 3);

        let ctx = RunContext::open(backend, &config, 100).await.unwrap();
        assert_eq!(ctx.workers(), 8);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            scan_batch: 0,
            ..EngineConfig::fast()
        };
        let result = RunContext::open(Arc::new(MemoryBackend::new()), &config, 4).await;
        assert!(matches!(result, Err(crate::MemoryError::Config(_))));
    }
}
