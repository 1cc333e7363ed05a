//! Pool lifecycle for the partition workers.
//!
//! This module defines the [`WorkerPool`] struct, which owns the spawned
//! worker tasks and coordinates phased, cancellable shutdown: refuse new
//! submissions, give open streams a bounded drain window, cancel remaining
//! work, then join every worker.

use super::worker::{WorkerContext, worker_loop};
use crate::server::streaming::registry::ConnectionRegistry;
use cascade_core::ChatRequest;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<ConnectionRegistry>,
    ingress_token: CancellationToken,
    shutdown_token: CancellationToken,
    drain_timeout: Duration,
}

impl WorkerPool {
    /// Spawns one worker per partition receiver.
    ///
    /// `ingress_token` is the broker's publish gate; cancelling it is the
    /// pool's first shutdown phase, so it is held here rather than by the
    /// broker's callers.
    pub fn spawn(
        receivers: Vec<mpsc::Receiver<ChatRequest>>,
        ctx: WorkerContext,
        ingress_token: CancellationToken,
        drain_timeout: Duration,
    ) -> Self {
        let registry = Arc::clone(&ctx.registry);
        let shutdown_token = ctx.shutdown_token.clone();

        let handles = receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, rx)| tokio::spawn(worker_loop(worker_id, rx, ctx.clone())))
            .collect();

        Self {
            handles: Mutex::new(handles),
            registry,
            ingress_token,
            shutdown_token,
            drain_timeout,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// This method is typically invoked during service termination.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new submissions ===
        tracing::info!("Refusing new submissions");
        self.ingress_token.cancel();

        // === Phase 1: Wait for open streams to drain ===
        tracing::info!("Draining open streams ({} active)", self.registry.count());
        let drain_result = timeout(self.drain_timeout, async {
            while self.registry.count() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                tracing::debug!("All open streams drained successfully");
            }
            Err(_) => {
                tracing::warn!(
                    "Graceful drain timed out ({} streams still active)",
                    self.registry.count()
                );
            }
        }

        // === Phase 2: Cancel remaining work ===
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Join workers ===
        let handles = std::mem::take(&mut *self.handles.lock());
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match timeout(Duration::from_secs(3), handle).await {
                Ok(Ok(())) => tracing::trace!("Worker {worker_id} shutdown acknowledged"),
                Ok(Err(e)) => tracing::error!("Worker {worker_id} join failed: {e}"),
                Err(_) => tracing::warn!("Worker {worker_id} shutdown timed out"),
            }
        }

        tracing::info!("Worker pool shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use crate::server::generation::{ChatModel, ScriptedModel};
    use crate::server::limiter::RateLimiter;

    fn spawn_pool(workers: usize) -> (WorkerPool, Vec<mpsc::Sender<ChatRequest>>) {
        let config = ServerConfig::for_tests();
        let registry = Arc::new(ConnectionRegistry::new(
            config.stream_buffer_size,
            config.connection_timeout,
        ));
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(Duration::ZERO));

        let mut senders = Vec::with_capacity(workers);
        let mut receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(config.partition_depth);
            senders.push(tx);
            receivers.push(rx);
        }

        let ctx = WorkerContext {
            registry,
            limiter: Arc::new(RateLimiter::new(config.rate_limit_per_sec)),
            model,
            config: config.clone(),
            shutdown_token: CancellationToken::new(),
        };
        let pool = WorkerPool::spawn(receivers, ctx, CancellationToken::new(), config.shutdown_timeout);
        (pool, senders)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn idle_pool_shuts_down_cleanly() {
        let (pool, _senders) = spawn_pool(3);
        assert_eq!(pool.worker_count(), 3);

        pool.shutdown().await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_exit_when_their_partition_closes() {
        let (pool, senders) = spawn_pool(2);
        drop(senders);

        // Closed partitions end the worker loops; shutdown only joins them.
        pool.shutdown().await;
        assert_eq!(pool.worker_count(), 0);
    }
}
