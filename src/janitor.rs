use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::rate_limiter::RateLimiter;

/// Background task that periodically reclaims idle client buckets.
///
/// Dropping the handle aborts the task; [`Janitor::shutdown`] stops it
/// cleanly and waits for it.
pub struct Janitor {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Janitor {
    /// Spawn the sweep loop on the current Tokio runtime.
    ///
    /// The first sweep runs one full interval after spawning.
    pub fn spawn<C: Clock + 'static>(limiter: RateLimiter<C>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = limiter.config().sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        debug!(
                            evicted,
                            tracked_clients = limiter.tracked_clients(),
                            "Rate limiter sweep finished"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Rate limiter janitor stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Signal the sweep loop to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Rate limiter janitor exited abnormally");
            }
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimiterConfig;
    use std::time::Duration;

    fn limiter_with_sweep(period: Duration) -> (RateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = LimiterConfig::new(1.0, 2, 100.0, 100).with_sweep_interval(period);
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_sweeps_on_interval() {
        let (limiter, clock) = limiter_with_sweep(Duration::from_secs(60));
        let janitor = Janitor::spawn(limiter.clone());

        limiter.allow("10.0.0.1");
        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.tracked_clients(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        janitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_keeps_busy_clients() {
        let (limiter, _clock) = limiter_with_sweep(Duration::from_secs(60));
        let janitor = Janitor::spawn(limiter.clone());

        limiter.allow("10.0.0.2");
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_clients(), 1);

        janitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_shutdown_stops_sweeping() {
        let (limiter, clock) = limiter_with_sweep(Duration::from_secs(60));
        let janitor = Janitor::spawn(limiter.clone());
        assert!(janitor.is_running());

        janitor.shutdown().await;

        limiter.allow("10.0.0.3");
        clock.advance(Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(600)).await;

        // Idle and full for ten intervals, yet nobody swept it.
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.sweep(), 1);
    }
}
