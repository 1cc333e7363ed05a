//! Partitioned, key-affine transport between ingress and the worker pool.
//!
//! Each partition is a bounded MPSC channel drained by exactly one worker.
//! Publishing hashes the request id onto a partition, so every delivery for
//! a given id (retries and duplicates included) lands on the same worker
//! and duplicates serialize instead of racing. A publish resolves once the
//! partition has accepted the message; that acknowledgement is what lets
//! ingress return `queued` without waiting for processing.

use cascade_core::{ChatRequest, Error, RequestId, Result};
use std::hash::{BuildHasher, RandomState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ChatBroker {
    partitions: Vec<mpsc::Sender<ChatRequest>>,
    hasher: RandomState,
    ingress_token: CancellationToken,
}

impl ChatBroker {
    /// Creates a broker with `num_partitions` bounded partitions of
    /// `depth` messages each, returning the receivers the worker pool
    /// consumes (one per partition).
    pub fn new(
        num_partitions: usize,
        depth: usize,
        ingress_token: CancellationToken,
    ) -> (Self, Vec<mpsc::Receiver<ChatRequest>>) {
        let mut partitions = Vec::with_capacity(num_partitions);
        let mut receivers = Vec::with_capacity(num_partitions);

        for _ in 0..num_partitions {
            let (tx, rx) = mpsc::channel(depth);
            partitions.push(tx);
            receivers.push(rx);
        }

        let broker = Self {
            partitions,
            hasher: RandomState::new(),
            ingress_token,
        };
        (broker, receivers)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition affinity: stable for the lifetime of this broker.
    pub fn partition_for(&self, key: &RequestId) -> usize {
        (self.hasher.hash_one(key.as_str()) % self.partitions.len() as u64) as usize
    }

    /// Publishes one request keyed by its id.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service is shutting down (`ingress_token` was cancelled).
    /// - The partition's channel is closed.
    pub async fn publish(&self, request: ChatRequest) -> Result<()> {
        if self.ingress_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let partition = self.partition_for(&request.request_id);
        self.partitions[partition]
            .send(request)
            .await
            .map_err(|_| Error::QueuePublish {
                context: format!("partition {partition} closed"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_choice_is_stable_per_key() {
        let (broker, _receivers) = ChatBroker::new(4, 8, CancellationToken::new());
        let id = RequestId::generate();

        let first = broker.partition_for(&id);
        for _ in 0..16 {
            assert_eq!(broker.partition_for(&id), first);
        }
        assert!(first < broker.partition_count());
    }

    #[tokio::test]
    async fn published_requests_arrive_on_their_key_partition() {
        let (broker, mut receivers) = ChatBroker::new(3, 8, CancellationToken::new());

        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        let partition = broker.partition_for(&request.request_id);
        let request_id = request.request_id.clone();

        broker.publish(request.clone()).await.unwrap();
        broker.publish(request).await.unwrap();

        let first = receivers[partition].recv().await.unwrap();
        let second = receivers[partition].recv().await.unwrap();
        assert_eq!(first.request_id, request_id);
        assert_eq!(second.request_id, request_id);
    }

    #[tokio::test]
    async fn publish_is_refused_after_shutdown() {
        let token = CancellationToken::new();
        let (broker, _receivers) = ChatBroker::new(2, 8, token.clone());
        token.cancel();

        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        assert!(matches!(
            broker.publish(request).await,
            Err(Error::ServiceShutdown)
        ));
    }

    #[tokio::test]
    async fn publish_fails_when_partition_is_gone() {
        let (broker, receivers) = ChatBroker::new(1, 8, CancellationToken::new());
        drop(receivers);

        let request = ChatRequest::new("u1".into(), "hello".into(), None);
        assert!(matches!(
            broker.publish(request).await,
            Err(Error::QueuePublish { .. })
        ));
    }
}
