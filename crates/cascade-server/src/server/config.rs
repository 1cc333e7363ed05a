//! Runtime configuration for the chat delivery service.
//!
//! CLI flags with environment-variable fallbacks (see `CASCADE_*`), parsed
//! by clap and validated into the [`ServerConfig`] handed to every
//! component. Defaults mirror the limits the downstream generation provider
//! imposes: 20 calls per second sustained, five workers in flight.

use clap::Parser;
use core::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "cascade-server",
    about = "Queued chat delivery over server-sent events",
    version
)]
pub struct CliArgs {
    /// Address the HTTP server binds to.
    #[arg(long, env = "CASCADE_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: String,

    /// Worker count; also the number of queue partitions.
    #[arg(long, env = "CASCADE_NUM_WORKERS", default_value_t = 5)]
    pub num_workers: usize,

    /// Queued requests each partition buffers before publishes wait.
    #[arg(long, env = "CASCADE_PARTITION_DEPTH", default_value_t = 128)]
    pub partition_depth: usize,

    /// Aggregate generation calls allowed per second, process-wide.
    #[arg(long, env = "CASCADE_RATE_LIMIT_PER_SEC", default_value_t = 20)]
    pub rate_limit_per_sec: u32,

    /// Milliseconds between connection-wait polls.
    #[arg(long, env = "CASCADE_CONNECTION_WAIT_INTERVAL_MS", default_value_t = 100)]
    pub connection_wait_interval_ms: u64,

    /// Seconds a worker waits for the client to subscribe before abandoning
    /// the request.
    #[arg(long, env = "CASCADE_CONNECTION_WAIT_MAX_SECS", default_value_t = 10)]
    pub connection_wait_max_secs: u64,

    /// Seconds an open push connection may live before it is closed.
    #[arg(long, env = "CASCADE_CONNECTION_TIMEOUT_SECS", default_value_t = 300)]
    pub connection_timeout_secs: u64,

    /// Chunks buffered per open connection before worker sends wait.
    #[arg(long, env = "CASCADE_STREAM_BUFFER_SIZE", default_value_t = 32)]
    pub stream_buffer_size: usize,

    /// Seconds open streams get to drain during graceful shutdown.
    #[arg(long, env = "CASCADE_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Milliseconds between fragments produced by the scripted model.
    #[arg(long, env = "CASCADE_SCRIPTED_CHUNK_DELAY_MS", default_value_t = 40)]
    pub scripted_chunk_delay_ms: u64,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub num_workers: usize,
    pub partition_depth: usize,
    pub rate_limit_per_sec: u32,
    pub connection_wait_interval: Duration,
    pub connection_wait_max: Duration,
    pub connection_timeout: Duration,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub scripted_chunk_delay: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        anyhow::ensure!(args.num_workers > 0, "num_workers must be at least 1");
        anyhow::ensure!(args.partition_depth > 0, "partition_depth must be at least 1");
        anyhow::ensure!(
            args.rate_limit_per_sec > 0,
            "rate_limit_per_sec must be at least 1"
        );
        anyhow::ensure!(
            args.connection_wait_interval_ms > 0,
            "connection_wait_interval_ms must be at least 1"
        );
        anyhow::ensure!(
            args.stream_buffer_size > 0,
            "stream_buffer_size must be at least 1"
        );

        Ok(Self {
            bind_addr: args.bind_addr,
            num_workers: args.num_workers,
            partition_depth: args.partition_depth,
            rate_limit_per_sec: args.rate_limit_per_sec,
            connection_wait_interval: Duration::from_millis(args.connection_wait_interval_ms),
            connection_wait_max: Duration::from_secs(args.connection_wait_max_secs),
            connection_timeout: Duration::from_secs(args.connection_timeout_secs),
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            scripted_chunk_delay: Duration::from_millis(args.scripted_chunk_delay_ms),
        })
    }
}

#[cfg(test)]
impl ServerConfig {
    /// Small, fast config for in-process tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            num_workers: 2,
            partition_depth: 16,
            rate_limit_per_sec: 1_000,
            connection_wait_interval: Duration::from_millis(10),
            connection_wait_max: Duration::from_secs(2),
            connection_timeout: Duration::from_secs(30),
            stream_buffer_size: 64,
            shutdown_timeout: Duration::from_millis(100),
            scripted_chunk_delay: Duration::ZERO,
        }
    }
}
