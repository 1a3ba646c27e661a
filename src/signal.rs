//! Process-wide stop signal.
//!
//! A [`StopSignal`] is created once by the coordinator and cloned into every
//! worker. Any holder may trigger it; all holders observe it. Workers check it
//! between iterations and race it against their sleeps, never against an
//! in-flight network call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cooperative, broadcast-readable shutdown flag.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Create a new, untriggered stop signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Set the flag. Idempotent.
    pub fn trigger(&self) {
        let changed = self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if changed {
            tracing::info!("Stop signal triggered");
        }
    }

    /// Whether the flag has been set.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is set.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of this signal, so an error
        // here is unreachable while `self` is alive.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration`, returning early if the flag is set.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_visible_to_clones() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_triggered());

        signal.trigger();
        assert!(clone.is_triggered());

        // Second trigger is a no-op
        clone.trigger();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let signal = StopSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait did not resolve")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_trigger() {
        let signal = StopSignal::new();
        let sleeper = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_trigger() {
        let signal = StopSignal::new();
        assert!(signal.sleep(Duration::from_secs(1)).await);
    }
}
