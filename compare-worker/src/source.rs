//! Where comparison requests come from, and how handled ones are acknowledged.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use compare_common::envelope::WorkRequest;

#[derive(Debug, Error)]
pub enum OffsetError {
    #[error("failed to store offset: {0}")]
    Kafka(#[from] KafkaError),
    #[error("offset store unavailable")]
    Unavailable,
}

/// Position of a received message within its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Wait for the next request. Dropping the future must not lose a message.
    async fn recv(&self) -> Result<(WorkRequest, Offset), KafkaError>;

    /// Acknowledge `offset` and everything before it in the same partition.
    fn store(&self, offset: Offset) -> Result<(), OffsetError>;
}

/// Offsets handed out but not yet stored, per partition, in receive order.
///
/// Storing an offset acknowledges every earlier one of its partition, so an
/// offset only becomes storable once all earlier offsets have settled. A
/// message that never settles holds back its whole partition.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, BTreeMap<i64, bool>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, offset: Offset) {
        self.partitions
            .entry(offset.partition)
            .or_default()
            .insert(offset.offset, false);
    }

    /// Mark `offset` as handled and return the highest offset of its partition that may now be stored.
    pub fn settle(&mut self, offset: Offset) -> Option<Offset> {
        let pending = self.partitions.get_mut(&offset.partition)?;
        match pending.get_mut(&offset.offset) {
            Some(settled) => *settled = true,
            None => return None,
        }

        let mut storable = None;
        while let Some(first) = pending.first_entry() {
            if !*first.get() {
                break;
            }
            storable = Some(Offset {
                partition: offset.partition,
                offset: *first.key(),
            });
            first.remove();
        }

        storable
    }

    /// Number of offsets begun but not yet stored.
    pub fn unsettled(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }
}

/// Source replaying a fixed list of requests, for tests. Waits forever once drained.
#[derive(Clone, Default)]
pub struct MemorySource {
    requests: Arc<Mutex<VecDeque<(WorkRequest, Offset)>>>,
    stored: Arc<Mutex<Vec<Offset>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(self, partition: i32, offset: i64, request: WorkRequest) -> Self {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push_back((request, Offset { partition, offset }));
        }
        self
    }

    pub fn stored(&self) -> Vec<Offset> {
        self.stored
            .lock()
            .map(|stored| stored.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RequestSource for MemorySource {
    async fn recv(&self) -> Result<(WorkRequest, Offset), KafkaError> {
        let next = self
            .requests
            .lock()
            .ok()
            .and_then(|mut requests| requests.pop_front());

        match next {
            Some(received) => Ok(received),
            None => std::future::pending().await,
        }
    }

    fn store(&self, offset: Offset) -> Result<(), OffsetError> {
        self.stored
            .lock()
            .map_err(|_| OffsetError::Unavailable)?
            .push(offset);
        Ok(())
    }
}
