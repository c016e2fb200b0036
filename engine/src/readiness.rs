//! Bounded polling for dependencies that become ready asynchronously.

use std::future::Future;
use std::time::Duration;

/// How long to wait for a dependency before degrading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(500),
        }
    }
}

impl Readiness {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Poll `probe` until it reports ready or the attempts run out.
    ///
    /// The probe runs at most `attempts` times with `delay` between runs.
    /// Returns whether the dependency became ready; callers proceed with
    /// degraded capability on `false`.
    pub async fn wait_until<F, Fut>(&self, mut probe: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.attempts {
            if probe().await {
                return true;
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        tracing::debug!(attempts = self.attempts, "Dependency not ready, giving up");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let ready = Readiness::new(4, Duration::from_millis(500))
            .wait_until(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            })
            .await;

        assert!(!ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_as_soon_as_ready() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let ready = Readiness::default()
            .wait_until(move || async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 })
            .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_never_probes() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let ready = Readiness::new(0, Duration::ZERO)
            .wait_until(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
            .await;

        assert!(!ready);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
