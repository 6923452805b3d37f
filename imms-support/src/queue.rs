//! A minimal partitioned FIFO queue abstraction. The real infrastructure is
//! an SQS FIFO queue (for file-arrival notifications) and a Kinesis-style
//! partitioned stream (for the shard forwarder's row envelopes); both are
//! out of scope, but both reduce to "publish a payload under a partition
//! key, consume payloads for a partition key in publish order."

use hashbrown::HashMap;
use miette::Diagnostic;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    #[error("queue publish to partition {partition} failed after {attempts} attempt(s)")]
    Unhandled { partition: String, attempts: u32 },
}

pub trait PartitionedQueue: Send + Sync {
    /// Appends `payload` to the tail of `partition`'s FIFO.
    fn publish(&self, partition: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Pops the head of `partition`'s FIFO, if any.
    fn poll(&self, partition: &str) -> Option<Vec<u8>>;

    /// Number of partitions with at least one unconsumed payload. Used by
    /// tests asserting completion.
    fn len(&self, partition: &str) -> usize;
}

#[derive(Default)]
pub struct LocalPartitionedQueue {
    partitions: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl LocalPartitionedQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartitionedQueue for LocalPartitionedQueue {
    fn publish(&self, partition: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.partitions
            .lock()
            .expect("queue mutex poisoned")
            .entry(partition.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    fn poll(&self, partition: &str) -> Option<Vec<u8>> {
        self.partitions
            .lock()
            .expect("queue mutex poisoned")
            .get_mut(partition)
            .and_then(|q| q.pop_front())
    }

    fn len(&self, partition: &str) -> usize {
        self.partitions
            .lock()
            .expect("queue mutex poisoned")
            .get(partition)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_fifo_order_within_a_partition() {
        let queue = LocalPartitionedQueue::new();
        queue.publish("acme_flu", b"row-1".to_vec()).unwrap();
        queue.publish("acme_flu", b"row-2".to_vec()).unwrap();

        assert_eq!(queue.poll("acme_flu"), Some(b"row-1".to_vec()));
        assert_eq!(queue.poll("acme_flu"), Some(b"row-2".to_vec()));
        assert_eq!(queue.poll("acme_flu"), None);
    }

    #[test]
    fn partitions_are_independent() {
        let queue = LocalPartitionedQueue::new();
        queue.publish("acme_flu", b"a".to_vec()).unwrap();
        queue.publish("acme_mmr", b"b".to_vec()).unwrap();

        assert_eq!(queue.len("acme_flu"), 1);
        assert_eq!(queue.len("acme_mmr"), 1);
        assert_eq!(queue.poll("acme_flu"), Some(b"a".to_vec()));
        assert_eq!(queue.len("acme_mmr"), 1);
    }
}
