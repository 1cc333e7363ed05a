//! One dequeued request's full lifecycle on a worker.

use crate::server::config::ServerConfig;
use crate::server::generation::ChatModel;
use crate::server::limiter::RateLimiter;
use crate::server::streaming::registry::ConnectionRegistry;
use crate::server::telemetry::{increment_requests_abandoned, record_stream_duration};
use cascade_core::{ChatChunk, ChatRequest, RequestId};
use core::time::Duration;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{Instant, sleep};

/// Drives one request from dequeue to terminal event.
///
/// Throttles on the shared limiter, waits (bounded) for the client's push
/// channel to appear, then forwards generated fragments in production order
/// and finishes with exactly one terminal event. A request whose client
/// never subscribes within the bound is abandoned: a log line, nothing else
/// - no retry, no dead-letter.
pub async fn handle_chat_request(
    worker_id: usize,
    request: ChatRequest,
    registry: &ConnectionRegistry,
    limiter: &RateLimiter,
    model: &Arc<dyn ChatModel>,
    config: &ServerConfig,
) {
    let request_id = request.request_id.clone();
    tracing::info!("worker {worker_id} processing request {request_id}");

    limiter.acquire().await;

    // The submit response races the client's subsequent subscribe call: the
    // queue often delivers before the push channel exists. Poll on a coarse
    // interval up to the bound, then give up.
    let subscribed = wait_for_connection(
        registry,
        &request_id,
        config.connection_wait_interval,
        config.connection_wait_max,
    )
    .await;

    if !subscribed {
        increment_requests_abandoned();
        tracing::warn!(
            "no subscriber for request {request_id} within {:?}, abandoning",
            config.connection_wait_max
        );
        return;
    }

    let start = Instant::now();
    let mut fragments = model.stream_chat(&request);

    while let Some(fragment) = fragments.next().await {
        match fragment {
            Ok(text) => {
                // `false` means nobody is listening anymore. The stream is
                // still drained so the backend call runs to completion;
                // every later delivery is a no-op.
                let _ = registry
                    .send(&request_id, ChatChunk::chunk(&request_id, text))
                    .await;
            }
            Err(e) => {
                tracing::error!("generation failed for request {request_id}: {e}");
                registry.fail(&request_id, e.to_string()).await;
                return;
            }
        }
    }

    registry.complete(&request_id).await;
    record_stream_duration(start.elapsed().as_millis() as f64);
    tracing::info!("worker {worker_id} finished request {request_id}");
}

async fn wait_for_connection(
    registry: &ConnectionRegistry,
    request_id: &RequestId,
    interval: Duration,
    max_wait: Duration,
) -> bool {
    let deadline = Instant::now() + max_wait;

    while !registry.exists(request_id) {
        if Instant::now() >= deadline {
            return false;
        }
        sleep(interval).await;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::generation::{FragmentStream, ScriptedModel};
    use cascade_core::Error;
    use futures::stream;

    struct FailingModel;

    impl ChatModel for FailingModel {
        fn stream_chat(&self, request: &ChatRequest) -> FragmentStream {
            let id = request.request_id.clone();
            stream::iter(vec![
                Ok(format!("partial answer for {id} ")),
                Err(Error::Generation {
                    reason: "upstream returned 503".into(),
                }),
            ])
            .boxed()
        }
    }

    fn pipeline() -> (ConnectionRegistry, RateLimiter, ServerConfig) {
        let config = ServerConfig::for_tests();
        let registry = ConnectionRegistry::new(config.stream_buffer_size, config.connection_timeout);
        let limiter = RateLimiter::new(config.rate_limit_per_sec);
        (registry, limiter, config)
    }

    #[tokio::test]
    async fn subscribed_client_sees_chunks_then_one_terminal_end() {
        let (registry, limiter, config) = pipeline();
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(Duration::ZERO));
        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        let request_id = request.request_id.clone();

        let connection = registry.open(&request_id).unwrap();
        handle_chat_request(0, request, &registry, &limiter, &model, &config).await;

        let chunks: Vec<ChatChunk> = connection.collect().await;
        let (terminal, fragments) = chunks.split_last().unwrap();

        assert!(!fragments.is_empty());
        assert!(fragments.iter().all(|chunk| !chunk.is_terminal()));
        assert!(terminal.is_terminal());
        assert!(terminal.error.is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_request_is_abandoned_after_the_bound() {
        let (registry, limiter, config) = pipeline();
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(Duration::ZERO));
        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        let request_id = request.request_id.clone();

        let start = Instant::now();
        handle_chat_request(0, request, &registry, &limiter, &model, &config).await;

        // Gave up after the bound without ever creating an entry.
        assert!(start.elapsed() >= config.connection_wait_max);
        assert!(!registry.exists(&request_id));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn generation_failure_is_reported_exactly_once() {
        let (registry, limiter, config) = pipeline();
        let model: Arc<dyn ChatModel> = Arc::new(FailingModel);
        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        let request_id = request.request_id.clone();

        let connection = registry.open(&request_id).unwrap();
        handle_chat_request(0, request, &registry, &limiter, &model, &config).await;

        let chunks: Vec<ChatChunk> = connection.collect().await;
        assert_eq!(chunks.len(), 2);

        // The fragment produced before the failure stays delivered.
        assert!(chunks[0].content.starts_with("partial answer"));
        assert_eq!(chunks[1].event_name(), "error");
        assert_eq!(chunks[1].error.as_deref(), Some("generation failed: upstream returned 503"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_within_the_bound_is_served() {
        let (registry, limiter, config) = pipeline();
        let registry = Arc::new(registry);
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(Duration::ZERO));
        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        let request_id = request.request_id.clone();

        let worker = {
            let registry = Arc::clone(&registry);
            let limiter = Arc::new(limiter);
            let config = config.clone();
            tokio::spawn(async move {
                handle_chat_request(0, request, &registry, &limiter, &model, &config).await;
            })
        };

        // Subscribe a few poll intervals after the worker started waiting.
        sleep(config.connection_wait_interval * 3).await;
        let connection = registry.open(&request_id).unwrap();

        worker.await.unwrap();
        let chunks: Vec<ChatChunk> = connection.collect().await;
        assert!(chunks.last().unwrap().is_terminal());
    }
}
