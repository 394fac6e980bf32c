//! Wait-interval schedules for the poll loop.

use std::time::Duration;

use crate::config::{PollOptions, PollStrategy};

/// Strategy state for one poll loop: the last interval handed out and the
/// last observed pending ratio.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    strategy: PollStrategy,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    last: Option<Duration>,
    last_ratio: Option<f64>,
}

impl IntervalSchedule {
    pub fn new(options: &PollOptions) -> Self {
        Self {
            strategy: options.strategy,
            initial: options.initial_interval(),
            max: options.max_interval().max(options.initial_interval()),
            multiplier: options.backoff_multiplier.max(1.0),
            last: None,
            last_ratio: None,
        }
    }

    /// Next wait. `pending_ratio` is `pending / total` of the sample that
    /// preceded the wait, or `None` when there was no usable sample.
    pub fn next(&mut self, pending_ratio: Option<f64>) -> Duration {
        let next = match self.strategy {
            PollStrategy::Fixed => self.initial,
            PollStrategy::Exponential => self.grow(),
            PollStrategy::Adaptive => {
                let shrinking = matches!(
                    (self.last_ratio, pending_ratio),
                    (Some(prev), Some(curr)) if curr < prev
                );
                if shrinking {
                    self.shrink()
                } else {
                    self.grow()
                }
            }
        };
        if pending_ratio.is_some() {
            self.last_ratio = pending_ratio;
        }
        self.last = Some(next);
        next
    }

    fn grow(&self) -> Duration {
        match self.last {
            None => self.initial,
            Some(last) => scale(last, self.multiplier)
                .unwrap_or(self.max)
                .min(self.max),
        }
    }

    fn shrink(&self) -> Duration {
        match self.last {
            None => self.initial,
            Some(last) => scale(last, 1.0 / self.multiplier)
                .unwrap_or(self.initial)
                .max(self.initial),
        }
    }
}

/// `d * factor` rounded to the nanosecond; `None` on overflow.
fn scale(d: Duration, factor: f64) -> Option<Duration> {
    let nanos = (d.as_nanos() as f64 * factor).round();
    (nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64)
        .then(|| Duration::from_nanos(nanos as u64))
}
