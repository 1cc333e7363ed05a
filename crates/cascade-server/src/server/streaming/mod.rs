//! Client-facing streaming: the connection registry and the per-request
//! processing that forwards generated fragments to subscribers.
//!
//! ## Structure
//!
//! - [`registry`] - directory of open push channels, keyed by request id.
//! - [`processor`] - one request's full lifecycle on a worker.

pub mod processor;
pub mod registry;
