//! Generation backend seam.
//!
//! Workers drive the backend through [`ChatModel`]: a pull stream of text
//! fragments, polled only by the worker that owns the request. Pulling on
//! the owning task is what preserves per-request ordering end to end - no
//! cross-task handoff exists between production and delivery.
//!
//! ## Structure
//!
//! - [`ScriptedModel`] - deterministic local backend for running without an
//!   external provider.

mod scripted;

pub use scripted::ScriptedModel;

use cascade_core::{ChatRequest, Result};
use futures::stream::BoxStream;

/// In-order fragments of generated text, ending normally after the last
/// fragment or with the single error that terminated production.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// An opaque streaming text producer.
///
/// Implementations yield zero or more non-empty fragments in production
/// order. A failure mid-stream is reported exactly once, as the final item;
/// whatever fragments were already yielded stay delivered. There are no
/// internal retries.
pub trait ChatModel: Send + Sync {
    fn stream_chat(&self, request: &ChatRequest) -> FragmentStream;
}
