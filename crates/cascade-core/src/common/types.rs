//! # Shared Chat Pipeline Types
//!
//! This module defines the wire contract carried through the whole delivery
//! pipeline: the message published to the queue at ingress, the chunk pushed
//! to a subscribed client, and the identifier correlating the two.
//!
//! ## Overview
//!
//! - [`RequestId`] - opaque correlation key, 128 random bits rendered as hex
//! - [`ChatRequest`] - the queued message, immutable once published
//! - [`ChatChunk`] - one streamed unit: a text fragment, the end marker, or
//!   a terminal error
//!
//! Field names serialize in camelCase so the queue schema and the pushed
//! JSON payloads match what subscribers expect on the wire.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of hex characters in a rendered [`RequestId`].
pub const REQUEST_ID_LEN: usize = 32;

/// Opaque unique identifier correlating one chat request across the
/// pipeline: ingress, queue partition, worker and push channel all key on
/// this value.
///
/// Generated at ingress from 128 bits of process randomness; collision
/// probability is negligible at any realistic volume, so the id is treated
/// as unique without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Draws a fresh identifier.
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The queued chat message.
///
/// Built once at ingress and immutable from then on; the transport key is
/// `request_id`, which pins every delivery (including duplicates) to the
/// same partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub request_id: RequestId,
    pub user_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Unix milliseconds at submission. Observability only.
    pub submitted_at: u64,
    /// Advisory scheduling hint, 1 = normal. Carried on the wire but not yet
    /// acted on by any scheduler.
    pub priority: u8,
}

impl ChatRequest {
    /// Builds a request with a fresh id, the current timestamp and normal
    /// priority.
    pub fn new(user_id: String, question: String, session_id: Option<String>) -> Self {
        let submitted_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            request_id: RequestId::generate(),
            user_id,
            question,
            session_id,
            submitted_at,
            priority: 1,
        }
    }
}

/// One streamed unit pushed to a subscribed client.
///
/// Workers forward these verbatim; a chunk with `is_end == true` is
/// terminal and closes the connection after delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChunk {
    pub request_id: RequestId,
    pub content: String,
    pub is_end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatChunk {
    /// An incremental text fragment.
    pub fn chunk(request_id: &RequestId, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.clone(),
            content: content.into(),
            is_end: false,
            error: None,
        }
    }

    /// The normal end-of-stream marker.
    pub fn end(request_id: &RequestId) -> Self {
        Self {
            request_id: request_id.clone(),
            content: String::new(),
            is_end: true,
            error: None,
        }
    }

    /// A terminal failure report.
    pub fn error(request_id: &RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.clone(),
            content: String::new(),
            is_end: true,
            error: Some(message.into()),
        }
    }

    /// Event name used on the push channel: `error` for failures, `message`
    /// for everything else (including the end marker).
    pub fn event_name(&self) -> &'static str {
        if self.error.is_some() { "error" } else { "message" }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_end
    }
}
