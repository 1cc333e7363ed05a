//! Worker task draining one queue partition.

use crate::server::config::ServerConfig;
use crate::server::generation::ChatModel;
use crate::server::limiter::RateLimiter;
use crate::server::streaming::processor::handle_chat_request;
use crate::server::streaming::registry::ConnectionRegistry;
use cascade_core::ChatRequest;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything a worker needs to run one request's lifecycle.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: Arc<ConnectionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub model: Arc<dyn ChatModel>,
    pub config: ServerConfig,
    pub shutdown_token: CancellationToken,
}

/// Processes requests from one partition until the channel closes or the
/// shutdown token is cancelled.
///
/// Each request is handled fully before the next is taken: pool width caps
/// how many generation calls run concurrently while the shared limiter caps
/// their aggregate rate - the two compose. A cancellation that lands
/// mid-wait or mid-call routes through the `fail` path with a
/// distinguishing message before the task exits; it is never swallowed.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<ChatRequest>,
    ctx: WorkerContext,
) {
    tracing::debug!("worker {worker_id} started");

    loop {
        let request = tokio::select! {
            () = ctx.shutdown_token.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let request_id = request.request_id.clone();
        tokio::select! {
            () = ctx.shutdown_token.cancelled() => {
                ctx.registry
                    .fail(&request_id, "processing interrupted")
                    .await;
                break;
            }
            () = handle_chat_request(
                worker_id,
                request,
                &ctx.registry,
                &ctx.limiter,
                &ctx.model,
                &ctx.config,
            ) => {}
        }
    }

    tracing::debug!("worker {worker_id} stopped");
}
