//! Bounded retry buffer for records the store did not accept.
//!
//! Records are kept already serialized so a replay sends the same bytes and
//! therefore the same idempotency key as the first attempt.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use cxdb_client::{ClientError, ContextStore};
use tracing::{debug, warn};

/// One record awaiting delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferedRecord {
    /// Target context.
    pub context_id: u64,
    /// Serialized msgpack payload.
    pub payload: Vec<u8>,
    /// Declared type id.
    pub type_id: String,
    /// Declared type version.
    pub type_version: u32,
}

/// Destination a buffer flush drains into.
#[async_trait]
pub trait RecordSink: Send {
    /// Failure reported by a send.
    type Error: fmt::Display + Send;

    /// Deliver one record.
    async fn send(&mut self, record: &BufferedRecord) -> Result<(), Self::Error>;
}

/// [`RecordSink`] appending to a borrowed [`ContextStore`].
///
/// Keeps the error that stopped the last flush so the caller can tell a
/// lost connection from a record the server refused.
pub struct StoreSink<'a, S: ?Sized> {
    store: &'a mut S,
    last_error: Option<ClientError>,
}

impl<'a, S: ContextStore + ?Sized> StoreSink<'a, S> {
    /// Sink over `store`.
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            last_error: None,
        }
    }

    /// Error of the most recent failed send, if any.
    pub fn into_error(self) -> Option<ClientError> {
        self.last_error
    }
}

#[async_trait]
impl<S: ContextStore + ?Sized> RecordSink for StoreSink<'_, S> {
    type Error = String;

    async fn send(&mut self, record: &BufferedRecord) -> Result<(), String> {
        let result = self
            .store
            .append_serialized(
                record.context_id,
                &record.payload,
                &record.type_id,
                record.type_version,
                0,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                self.last_error = Some(e);
                Err(message)
            }
        }
    }
}

/// Bounded FIFO that evicts its oldest record when full.
pub struct RetryBuffer {
    records: VecDeque<BufferedRecord>,
    capacity: usize,
    overflow_count: u64,
    rejected_count: u64,
    total_enqueued: u64,
    total_sent: u64,
}

impl RetryBuffer {
    /// Empty buffer holding at most `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            overflow_count: 0,
            rejected_count: 0,
            total_enqueued: 0,
            total_sent: 0,
        }
    }

    /// Records currently pending.
    #[must_use]
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of pending records.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records evicted because the buffer was full.
    #[must_use]
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Records removed by [`discard_front`](Self::discard_front).
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count
    }

    /// Records ever enqueued.
    #[must_use]
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued
    }

    /// Records ever delivered by [`flush`](Self::flush).
    #[must_use]
    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Pending records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedRecord> {
        self.records.iter()
    }

    /// Append a record, evicting the oldest one when full. Never fails.
    pub fn enqueue(&mut self, record: BufferedRecord) {
        if self.records.len() >= self.capacity {
            let _ = self.records.pop_front();
            self.overflow_count += 1;
            if self.overflow_count == 1 || self.overflow_count % 100 == 0 {
                warn!(
                    dropped = self.overflow_count,
                    capacity = self.capacity,
                    "retry buffer overflow, oldest records dropped"
                );
            }
        }
        self.records.push_back(record);
        self.total_enqueued += 1;
    }

    /// Send pending records in order, stopping at the first failure.
    ///
    /// The failing record and everything behind it stay queued. Returns the
    /// number of records delivered.
    pub async fn flush<K: RecordSink + ?Sized>(&mut self, sink: &mut K) -> usize {
        let mut sent = 0;
        while let Some(record) = self.records.front() {
            match sink.send(record).await {
                Ok(()) => {
                    let _ = self.records.pop_front();
                    sent += 1;
                    self.total_sent += 1;
                }
                Err(e) => {
                    debug!(
                        sent,
                        remaining = self.records.len(),
                        error = %e,
                        "buffer flush stopped"
                    );
                    break;
                }
            }
        }
        sent
    }

    /// Remove the oldest record, one the store will never accept.
    pub fn discard_front(&mut self) -> Option<BufferedRecord> {
        let record = self.records.pop_front()?;
        self.rejected_count += 1;
        Some(record)
    }

    /// Drop every pending record. Counters are kept.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl fmt::Debug for RetryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryBuffer")
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow_count)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
