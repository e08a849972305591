use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Limits how often progress is propagated to observers.
///
/// The first update and the final update always pass; anything in between
/// passes only once `interval` has elapsed since the last one that did.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns `true` if an update observed at `now` should be propagated.
    pub fn should_emit(&mut self, now: Instant, is_final: bool) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if due || is_final {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back(SpeedSample {
            bytes,
            timestamp: now,
        });

        while self
            .samples
            .front()
            .is_some_and(|s| now.duration_since(s.timestamp) > self.window_size)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        // The first sample marks the start of the window.
        let total: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }
}
