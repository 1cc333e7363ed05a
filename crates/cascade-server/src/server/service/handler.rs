//! Chat delivery service and its HTTP surface.
//!
//! This module defines [`ChatService`], which wires ingress, the partitioned
//! queue, the worker pool and the streaming registry together, and exposes
//! them over four routes:
//!
//! - `POST /api/chat/submit` - enqueue a submission, answer immediately.
//! - `GET /api/stream/{request_id}` - open the push channel (SSE).
//! - `GET /api/stream/status/{request_id}` - read-only diagnostics.
//! - `GET /healthz` - liveness.
//!
//! ## Responsibilities
//!
//! - Spawn and own the background worker pool.
//! - Validate submissions and publish them keyed by request id.
//! - Surface duplicate subscribes as conflicts without touching the
//!   original connection.
//! - Coordinate phased graceful shutdown.

use crate::server::config::ServerConfig;
use crate::server::generation::ChatModel;
use crate::server::limiter::RateLimiter;
use crate::server::pool::manager::WorkerPool;
use crate::server::pool::worker::WorkerContext;
use crate::server::queue::broker::ChatBroker;
use crate::server::streaming::registry::ConnectionRegistry;
use crate::server::telemetry::increment_requests;
use axum::extract::{Form, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use cascade_core::{ApiResponse, ChatChunk, ChatRequest, Error, RequestId, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The chat delivery pipeline behind the HTTP surface.
#[derive(Clone)]
pub struct ChatService {
    broker: Arc<ChatBroker>,
    registry: Arc<ConnectionRegistry>,
    worker_pool: Arc<WorkerPool>,
}

impl ChatService {
    /// Creates the service and spawns the worker pool.
    ///
    /// One queue partition per worker: key-affine publishing then gives
    /// every request id a stable worker, so duplicate deliveries serialize
    /// instead of racing each other.
    pub fn new(config: ServerConfig, model: Arc<dyn ChatModel>) -> Self {
        let ingress_token = CancellationToken::new();
        let shutdown_token = CancellationToken::new();

        let (broker, receivers) = ChatBroker::new(
            config.num_workers,
            config.partition_depth,
            ingress_token.clone(),
        );
        let registry = Arc::new(ConnectionRegistry::new(
            config.stream_buffer_size,
            config.connection_timeout,
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_sec));

        let drain_timeout = config.shutdown_timeout;
        let ctx = WorkerContext {
            registry: Arc::clone(&registry),
            limiter,
            model,
            config,
            shutdown_token,
        };
        let worker_pool = WorkerPool::spawn(receivers, ctx, ingress_token, drain_timeout);
        tracing::info!(
            "spawned {} workers over {} queue partitions",
            worker_pool.worker_count(),
            broker.partition_count()
        );

        Self {
            broker: Arc::new(broker),
            registry,
            worker_pool: Arc::new(worker_pool),
        }
    }

    /// Validates and enqueues one submission, returning its correlation id
    /// once the transport has acknowledged the publish.
    ///
    /// A publish failure leaves no state behind: nothing is registered
    /// anywhere until the client subscribes.
    pub async fn submit(
        &self,
        user_id: String,
        question: String,
        session_id: Option<String>,
    ) -> Result<RequestId> {
        if question.trim().is_empty() {
            return Err(Error::InvalidRequest {
                reason: "question must not be empty".into(),
            });
        }

        let request = ChatRequest::new(user_id, question, session_id);
        let request_id = request.request_id.clone();

        self.broker.publish(request).await?;
        increment_requests();
        tracing::info!("request queued: {request_id}");
        Ok(request_id)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Initiates phased graceful shutdown: refuse new submissions, drain
    /// open streams, cancel remaining work, join the workers.
    pub async fn shutdown(&self) {
        self.worker_pool.shutdown().await;
    }

    /// Builds the HTTP router over this service.
    pub fn into_router(self) -> Router {
        Router::new()
            .route("/api/chat/submit", post(submit_chat))
            .route("/api/stream/{request_id}", get(stream_chat))
            .route("/api/stream/status/{request_id}", get(stream_status))
            .route("/healthz", get(health))
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    user_id: String,
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAck {
    request_id: RequestId,
    status: String,
}

async fn submit_chat(
    State(service): State<ChatService>,
    Form(params): Form<SubmitParams>,
) -> Result<Json<ApiResponse<SubmitAck>>> {
    let request_id = service
        .submit(params.user_id, params.question, params.session_id)
        .await?;

    let ack = SubmitAck {
        request_id,
        status: "queued".to_string(),
    };
    Ok(Json(ApiResponse::success_with_msg(
        ack,
        "request queued; open the stream with this request id",
    )))
}

async fn stream_chat(
    State(service): State<ChatService>,
    Path(request_id): Path<RequestId>,
) -> Result<Sse<impl Stream<Item = core::result::Result<Event, Infallible>>>> {
    let connection = service.registry().open(&request_id)?;
    let stream = connection.map(|chunk| Ok(sse_event(&chunk)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(chunk: &ChatChunk) -> Event {
    // ChatChunk serialization cannot fail in practice; fall back to the bare
    // content if it ever does.
    let payload = serde_json::to_string(chunk).unwrap_or_else(|_| chunk.content.clone());
    Event::default().event(chunk.event_name()).data(payload)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamStatus {
    request_id: RequestId,
    connected: bool,
    total_connections: usize,
}

async fn stream_status(
    State(service): State<ChatService>,
    Path(request_id): Path<RequestId>,
) -> Json<ApiResponse<StreamStatus>> {
    let connected = service.registry().exists(&request_id);
    let status = StreamStatus {
        request_id,
        connected,
        total_connections: service.registry().count(),
    };
    Json(ApiResponse::success(status))
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("chat service is running"))
}
