//! Timer-driven batching forwarder.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use tokio::time::MissedTickBehavior;

use crate::buffer::ReadingBuffer;
use crate::device::Reading;
use crate::forwarder::{AuditLog, Batch, Transport};
use crate::signal::StopSignal;

/// Default forwarding cadence (5 seconds).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Default delivery attempts per cycle.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between delivery attempts (1 second).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default cap on readings kept for redelivery.
pub const DEFAULT_MAX_UNDELIVERED: usize = 100_000;

/// Default audit log location.
pub const DEFAULT_AUDIT_LOG: &str = "data/audit.log";

fn default_tick_interval() -> Duration {
    DEFAULT_TICK_INTERVAL
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

fn default_max_undelivered() -> usize {
    DEFAULT_MAX_UNDELIVERED
}

fn default_audit_log() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_LOG)
}

/// Forwarder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Cadence of drain-and-deliver cycles.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Delivery attempts per cycle before deferring the batch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between attempts within a cycle.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Readings kept for redelivery; the oldest are dropped beyond this.
    #[serde(default = "default_max_undelivered")]
    pub max_undelivered: usize,
    /// Audit log file.
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_undelivered: DEFAULT_MAX_UNDELIVERED,
            audit_log: default_audit_log(),
        }
    }
}

impl ForwarderConfig {
    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the attempt count and the delay between attempts.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the redelivery cap.
    pub fn with_max_undelivered(mut self, max: usize) -> Self {
        self.max_undelivered = max;
        self
    }

    /// Set the audit log path.
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = path.into();
        self
    }
}

/// Result of one forwarder cycle.
#[derive(Debug, Clone, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum CycleOutcome {
    /// Nothing to send; no transport call was made.
    Empty,
    /// The batch was accepted by the endpoint.
    Delivered { readings: usize, attempts: u32 },
    /// Every attempt failed; readings kept for the next cycle.
    Deferred { readings: usize, dropped: usize },
}

/// Totals reported when the forwarder exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderSummary {
    /// Cycles that made at least one transport call.
    pub cycles: u64,
    /// Readings confirmed by the endpoint.
    pub delivered: u64,
    /// Readings dropped by the redelivery cap.
    pub dropped: u64,
    /// Readings left unsent at shutdown.
    pub pending_at_shutdown: usize,
}

/// Single consumer of the reading buffer.
///
/// Each tick drains the buffer, prepends readings a previous cycle failed to
/// deliver, and sends the batch with bounded retries. Only confirmed batches
/// reach the audit log. Transport failures never escape the forwarder.
pub struct Forwarder {
    buffer: ReadingBuffer,
    transport: Arc<dyn Transport>,
    audit: AuditLog,
    stop: StopSignal,
    config: ForwarderConfig,
    undelivered: Vec<Reading>,
    summary: ForwarderSummary,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("config", &self.config)
            .field("undelivered", &self.undelivered.len())
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    /// Create a forwarder draining `buffer` into `transport`.
    pub fn new(
        buffer: ReadingBuffer,
        transport: Arc<dyn Transport>,
        audit: AuditLog,
        stop: StopSignal,
        config: ForwarderConfig,
    ) -> Self {
        Self {
            buffer,
            transport,
            audit,
            stop,
            config,
            undelivered: Vec::new(),
            summary: ForwarderSummary::default(),
        }
    }

    /// Readings waiting for redelivery.
    pub fn undelivered(&self) -> &[Reading] {
        &self.undelivered
    }

    /// Run cycles on the configured cadence until the stop signal is set.
    ///
    /// Readings still buffered or awaiting redelivery at shutdown are counted,
    /// not sent.
    pub async fn run(mut self) -> ForwarderSummary {
        tracing::info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            audit_log = %self.audit.path().display(),
            "Forwarder started"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.stop.wait() => break,
                _ = ticker.tick() => {}
            }
            if self.stop.is_triggered() {
                break;
            }
            self.run_cycle().await;
        }

        self.summary.pending_at_shutdown = self.undelivered.len() + self.buffer.len();
        if self.summary.pending_at_shutdown > 0 {
            tracing::warn!(
                count = self.summary.pending_at_shutdown,
                "Dropping undelivered readings at shutdown"
            );
        }
        tracing::info!(
            cycles = self.summary.cycles,
            delivered = self.summary.delivered,
            dropped = self.summary.dropped,
            "Forwarder stopped"
        );
        self.summary
    }

    /// Drain, batch and deliver once.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let drained = self.buffer.drain();
        let batch = Batch::new(std::mem::take(&mut self.undelivered), drained);
        if batch.is_empty() {
            tracing::trace!("Nothing to forward");
            return CycleOutcome::Empty;
        }

        self.summary.cycles += 1;
        tracing::debug!(count = batch.len(), "Forwarding batch");

        let max_attempts = self.config.max_retries.max(1);
        for attempt in 1..=max_attempts {
            match self.transport.send(&batch).await {
                Ok(()) => return self.confirm(batch, attempt).await,
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        count = batch.len(),
                        error = %e,
                        "Batch delivery failed"
                    );
                }
            }

            if attempt < max_attempts && !self.stop.sleep(self.config.retry_delay).await {
                break;
            }
        }

        self.defer(batch)
    }

    async fn confirm(&mut self, batch: Batch, attempts: u32) -> CycleOutcome {
        let count = batch.len();
        self.summary.delivered += count as u64;

        // The endpoint already holds these readings; a failed audit write must
        // not requeue them.
        if let Err(e) = self.audit.append(batch.readings()).await {
            tracing::error!(error = %e, count, "Failed to append delivered readings to audit log");
        }

        tracing::info!(count, attempts, "Batch delivered");
        CycleOutcome::Delivered {
            readings: count,
            attempts,
        }
    }

    fn defer(&mut self, batch: Batch) -> CycleOutcome {
        let mut readings = batch.into_readings();
        let dropped = readings.len().saturating_sub(self.config.max_undelivered);
        if dropped > 0 {
            readings.drain(..dropped);
            self.summary.dropped += dropped as u64;
            tracing::warn!(
                dropped,
                cap = self.config.max_undelivered,
                "Redelivery cap reached, dropping oldest readings"
            );
        }

        let count = readings.len();
        self.undelivered = readings;
        tracing::error!(count, "Delivery retries exhausted, deferring batch to next cycle");
        CycleOutcome::Deferred {
            readings: count,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::{AuditRecord, TransportError};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport failing a set number of times, recording every batch it sees.
    #[derive(Default)]
    struct FlakyTransport {
        failures_left: AtomicU32,
        calls: AtomicU32,
        seen: Mutex<Vec<Batch>>,
    }

    impl FlakyTransport {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(batch.clone());
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Status(503));
            }
            Ok(())
        }
    }

    fn reading(serial: &str, secs: i64, wattage: f64) -> Reading {
        Reading::new(serial, Utc.timestamp_opt(secs, 0).unwrap(), wattage)
    }

    async fn setup(
        transport: Arc<FlakyTransport>,
        config: ForwarderConfig,
    ) -> (Forwarder, ReadingBuffer, StopSignal, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let buffer = ReadingBuffer::new();
        let stop = StopSignal::new();
        let forwarder = Forwarder::new(buffer.clone(), transport, audit, stop.clone(), config);
        (forwarder, buffer, stop, dir)
    }

    fn config() -> ForwarderConfig {
        ForwarderConfig::default().with_retries(3, Duration::from_millis(10))
    }

    async fn audit_records(dir: &tempfile::TempDir) -> Vec<AuditRecord> {
        AuditLog::read_all(dir.path().join("audit.log"))
            .await
            .unwrap()
            .records
    }

    #[tokio::test]
    async fn test_empty_tick_makes_no_call() {
        let transport = Arc::new(FlakyTransport::default());
        let (mut forwarder, _buffer, _stop, dir) = setup(transport.clone(), config()).await;

        assert_eq!(forwarder.run_cycle().await, CycleOutcome::Empty);
        assert_eq!(transport.calls(), 0);
        assert!(audit_records(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_then_succeed_delivers_once() {
        let transport = Arc::new(FlakyTransport::failing(2));
        let (mut forwarder, buffer, _stop, dir) = setup(transport.clone(), config()).await;

        buffer.push(reading("AA11", 1_700_000_000, 42.0));
        buffer.push(reading("BB22", 1_700_000_001, 7.5));

        let outcome = forwarder.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Delivered {
                readings: 2,
                attempts: 3
            }
        );
        assert_eq!(transport.calls(), 3);

        // Every attempt carried the full batch
        let seen = transport.seen.lock().unwrap().clone();
        assert!(seen.iter().all(|b| b.len() == 2));

        let records = audit_records(&dir).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].serial, "AA11");
        assert_eq!(records[1].wattage, 7.5);
        assert!(forwarder.undelivered().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_defer_to_next_cycle() {
        let transport = Arc::new(FlakyTransport::failing(3));
        let (mut forwarder, buffer, _stop, dir) = setup(transport.clone(), config()).await;

        let first = vec![
            reading("AA11", 1_700_000_000, 42.0),
            reading("AA11", 1_700_000_001, 43.0),
        ];
        for r in &first {
            buffer.push(r.clone());
        }

        let outcome = forwarder.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Deferred {
                readings: 2,
                dropped: 0
            }
        );
        assert_eq!(transport.calls(), 3);
        assert!(audit_records(&dir).await.is_empty());
        assert_eq!(forwarder.undelivered(), first.as_slice());

        // Next cycle: deferred readings come first, unmodified
        let late = reading("BB22", 1_700_000_005, 1.0);
        buffer.push(late.clone());
        let outcome = forwarder.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Delivered {
                readings: 3,
                attempts: 1
            }
        );

        let seen = transport.seen.lock().unwrap().clone();
        let last = seen.last().unwrap().readings().to_vec();
        assert_eq!(&last[..2], first.as_slice());
        assert_eq!(last[2], late);

        assert_eq!(audit_records(&dir).await.len(), 3);
    }

    #[tokio::test]
    async fn test_redelivery_cap_drops_oldest() {
        let transport = Arc::new(FlakyTransport::failing(u32::MAX));
        let (mut forwarder, buffer, _stop, _dir) =
            setup(transport, config().with_max_undelivered(2)).await;

        for i in 0..3 {
            buffer.push(reading("AA11", 1_700_000_000 + i, i as f64));
        }

        let outcome = forwarder.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Deferred {
                readings: 2,
                dropped: 1
            }
        );
        let kept: Vec<f64> = forwarder.undelivered().iter().map(|r| r.wattage).collect();
        assert_eq!(kept, vec![1.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_stopped() {
        let transport = Arc::new(FlakyTransport::default());
        let config = config().with_tick_interval(Duration::from_secs(5));
        let (forwarder, buffer, stop, dir) = setup(transport.clone(), config).await;

        buffer.push(reading("AA11", 1_700_000_000, 42.0));
        let task = tokio::spawn(forwarder.run());

        // Nothing is sent before the first full tick
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.calls(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.calls(), 1);

        // Empty ticks do not call the transport
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(transport.calls(), 1);

        buffer.push(reading("AA11", 1_700_000_030, 1.0));
        stop.trigger();
        let summary = task.await.unwrap();

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.pending_at_shutdown, 1);
        assert_eq!(audit_records(&dir).await.len(), 1);
    }

    #[test]
    fn test_cycle_outcome_names() {
        assert_eq!(CycleOutcome::Empty.as_ref(), "empty");
        let outcome = CycleOutcome::Deferred {
            readings: 1,
            dropped: 0,
        };
        assert_eq!(outcome.as_ref(), "deferred");
    }

    #[test]
    fn test_config_from_yaml() {
        let config: ForwarderConfig = serde_yaml::from_str(
            "tick_interval: 10s\nmax_retries: 5\nretry_delay: 500ms\naudit_log: /tmp/a.log\n",
        )
        .unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.max_undelivered, DEFAULT_MAX_UNDELIVERED);
        assert_eq!(config.audit_log, PathBuf::from("/tmp/a.log"));
    }
}
