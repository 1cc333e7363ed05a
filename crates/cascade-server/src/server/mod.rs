//! Service internals: configuration, the queue transport, the worker pool,
//! the streaming connection registry and the HTTP surface.

pub mod config;
pub mod generation;
pub mod limiter;
pub mod pool;
pub mod queue;
pub mod service;
pub mod streaming;
pub mod telemetry;
