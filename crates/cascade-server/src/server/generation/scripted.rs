//! Deterministic stand-in for a hosted generation provider.

use super::{ChatModel, FragmentStream};
use cascade_core::ChatRequest;
use core::time::Duration;
use futures::StreamExt;
use futures::stream;

/// Streams a canned reply in word-sized fragments with a fixed
/// inter-fragment delay, so the full pipeline can run end to end without
/// external credentials.
pub struct ScriptedModel {
    chunk_delay: Duration,
}

impl ScriptedModel {
    pub fn new(chunk_delay: Duration) -> Self {
        Self { chunk_delay }
    }

    /// Splits the reply into word fragments, each keeping its trailing
    /// space, so concatenating the fragments reproduces the reply exactly.
    fn fragments(question: &str) -> Vec<String> {
        let reply = format!(
            "You asked: \"{question}\". This deployment answers from a local \
             script so the delivery pipeline can be exercised end to end."
        );

        let words: Vec<&str> = reply.split(' ').collect();
        let last = words.len() - 1;
        words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                if i == last {
                    (*word).to_string()
                } else {
                    format!("{word} ")
                }
            })
            .filter(|fragment| !fragment.is_empty())
            .collect()
    }
}

impl ChatModel for ScriptedModel {
    fn stream_chat(&self, request: &ChatRequest) -> FragmentStream {
        let delay = self.chunk_delay;
        stream::iter(Self::fragments(&request.question))
            .then(move |fragment| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(fragment)
            })
            .boxed()
    }
}
