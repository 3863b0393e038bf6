//! Bounded polling
//!
//! Every wait in the engine goes through [`poll_until`]: the probe runs at
//! least once, then every `poll_interval` until it reports ready or the timeout
//! elapses. Timing uses tokio's clock so paused-time tests stay deterministic.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::E2eResult;

/// Default poll interval for checking conditions (100ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitConfig {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }
}

/// Result of one probe attempt.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    /// Not there yet; the reason is kept for the timeout message
    Pending(String),
}

/// Outcome of a bounded wait.
#[derive(Debug)]
pub enum Polled<T> {
    Ready(T),
    Elapsed { last_reason: String },
}

/// Polls `probe` until it is ready or `config.timeout` elapses.
///
/// Errors returned by the probe are not retried; the probe decides what is
/// transient by mapping it to [`Probe::Pending`].
pub async fn poll_until<T, F, Fut>(config: WaitConfig, probe: F) -> E2eResult<Polled<T>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = E2eResult<Probe<T>>>,
{
    let deadline = Instant::now() + config.timeout;

    loop {
        let last_reason = match probe().await? {
            Probe::Ready(value) => return Ok(Polled::Ready(value)),
            Probe::Pending(reason) => reason,
        };

        let now = Instant::now();
        if now >= deadline {
            return Ok(Polled::Elapsed { last_reason });
        }

        sleep(config.poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn poll_succeeds_immediately() {
        let result = poll_until(WaitConfig::with_timeout(Duration::ZERO), || async {
            Ok(Probe::Ready(7))
        })
        .await
        .unwrap();

        assert!(matches!(result, Polled::Ready(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = poll_until(WaitConfig::with_timeout(Duration::from_secs(5)), move || {
            let c = c.clone();
            async move {
                let count = c.fetch_add(1, Ordering::SeqCst);
                Ok(if count >= 3 {
                    Probe::Ready(count)
                } else {
                    Probe::Pending("warming up".to_string())
                })
            }
        })
        .await
        .unwrap();

        assert!(matches!(result, Polled::Ready(3)));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_with_last_reason() {
        let start = Instant::now();
        let result: Polled<()> = poll_until(
            WaitConfig::new(Duration::from_millis(250), Duration::from_millis(100)),
            || async { Ok(Probe::Pending("not visible".to_string())) },
        )
        .await
        .unwrap();

        match result {
            Polled::Elapsed { last_reason } => assert_eq!(last_reason, "not visible"),
            Polled::Ready(()) => panic!("expected timeout"),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }
}
