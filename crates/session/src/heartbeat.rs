//! Keepalive and liveness detection for a live session.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Result of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatCheck {
    /// Peer answered recently; send the next `PING`.
    Alive,
    /// No `PONG` for longer than the liveness timeout.
    Expired { silent_for: Duration },
}

/// Sends `PING` on a fixed interval and watches for `PONG`s.
///
/// Only runs while the session is live.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    liveness_timeout: Duration,
    ticker: Option<Interval>,
    last_pong: Instant,
}

impl HeartbeatMonitor {
    pub(crate) fn new(interval: Duration, liveness_timeout: Duration) -> Self {
        Self {
            interval,
            liveness_timeout,
            ticker: None,
            last_pong: Instant::now(),
        }
    }

    /// Starts ticking. The first tick fires one interval from now.
    pub(crate) fn start(&mut self) {
        let now = Instant::now();
        let mut ticker = tokio::time::interval_at(now + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.last_pong = now;
    }

    pub(crate) fn stop(&mut self) {
        self.ticker = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub(crate) fn record_pong(&mut self) {
        self.last_pong = Instant::now();
    }

    /// Waits for the next tick. Never resolves while stopped.
    pub(crate) async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    pub(crate) fn check(&self) -> HeartbeatCheck {
        let silent_for = self.last_pong.elapsed();
        if silent_for > self.liveness_timeout {
            HeartbeatCheck::Expired { silent_for }
        } else {
            HeartbeatCheck::Alive
        }
    }
}
