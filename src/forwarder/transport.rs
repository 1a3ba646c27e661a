//! Transport abstraction for delivering batches.

use thiserror::Error;

use crate::device::Reading;

/// Errors raised by a single delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, timeout or encoding failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collection endpoint rejected the batch.
    #[error("collection endpoint returned status {0}")]
    Status(u16),
}

/// Readings forwarded together in one delivery attempt.
///
/// Previously undelivered readings come first, followed by the freshly
/// drained ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    readings: Vec<Reading>,
}

impl Batch {
    /// Build a batch from retried readings followed by new ones.
    pub fn new(undelivered: Vec<Reading>, drained: Vec<Reading>) -> Self {
        let mut readings = undelivered;
        readings.extend(drained);
        Self { readings }
    }

    /// Readings in delivery order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Number of readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether the batch holds no reading.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Take the readings back out.
    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }
}

impl From<Vec<Reading>> for Batch {
    fn from(readings: Vec<Reading>) -> Self {
        Self { readings }
    }
}

/// Mechanism delivering a batch to the remote collection endpoint.
///
/// One call is one attempt; retrying is the forwarder's job.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver the whole batch as one unit.
    async fn send(&self, batch: &Batch) -> Result<(), TransportError>;
}
