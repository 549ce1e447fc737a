//! Time-weighted counting of a quantity that changes at discrete instants.
//!
//! An [`HourCounter`] integrates its count over (simulated) time, so that averages such as the
//! mean queue length or server utilization can be derived at any moment. All statistics are
//! computed from the accumulated totals; there is no separately stored average.
//!
//! # Examples
//!
//! ```
//! # use desk::HourCounter;
//! # use std::time::Duration;
//! # fn main() -> desk::Result<()> {
//! let hour = Duration::from_secs(3600);
//! let mut counter = HourCounter::new(Duration::default());
//! counter.observe_change(1.0, hour)?;
//! counter.observe_change(-1.0, 3 * hour)?;
//! counter.observe_count(0.0, 4 * hour)?;
//! // busy for 2 out of 4 hours
//! assert_eq!(counter.average_count(), 0.5);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use ordered_float::OrderedFloat;

use crate::{Error, Result};

const SECONDS_PER_HOUR: f64 = 3600.0;

fn hours_between(from: Duration, to: Duration) -> f64 {
    to.checked_sub(from)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64() / SECONDS_PER_HOUR)
}

/// Bounded log of past `(time, count)` observations; the oldest entries are evicted first.
#[derive(Debug, Clone)]
struct History {
    capacity: usize,
    entries: VecDeque<(Duration, f64)>,
}

impl History {
    fn record(&mut self, time: Duration, count: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((time, count));
    }
}

/// Time-weighted counter.
#[derive(Debug, Clone)]
pub struct HourCounter {
    initial_time: Duration,
    last_time: Duration,
    last_count: f64,
    paused: bool,
    total_increment: f64,
    total_decrement: f64,
    total_hours: f64,
    cum_value: f64,
    hours_for_count: BTreeMap<OrderedFloat<f64>, f64>,
    history: Option<History>,
}

impl HourCounter {
    /// Creates a counter starting at zero at `initial_time`.
    #[must_use]
    pub fn new(initial_time: Duration) -> Self {
        Self {
            initial_time,
            last_time: initial_time,
            last_count: 0.0,
            paused: false,
            total_increment: 0.0,
            total_decrement: 0.0,
            total_hours: 0.0,
            cum_value: 0.0,
            hours_for_count: BTreeMap::new(),
            history: None,
        }
    }

    /// Creates a counter that additionally keeps up to `capacity` most recent observations.
    #[must_use]
    pub fn with_history(initial_time: Duration, capacity: usize) -> Self {
        Self {
            history: Some(History {
                capacity,
                entries: VecDeque::new(),
            }),
            ..Self::new(initial_time)
        }
    }

    /// Observes a new absolute value of the count at `time`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrderObservation`] if `time` precedes the last observation.
    pub fn observe_count(&mut self, count: f64, time: Duration) -> Result<()> {
        if time < self.last_time {
            return Err(Error::OutOfOrderObservation {
                time,
                last: self.last_time,
            });
        }
        if !self.paused {
            let hours = hours_between(self.last_time, time);
            self.total_hours += hours;
            self.cum_value += hours * self.last_count;
            *self
                .hours_for_count
                .entry(OrderedFloat(self.last_count))
                .or_insert(0.0) += hours;
            if count > self.last_count {
                self.total_increment += count - self.last_count;
            } else {
                self.total_decrement += self.last_count - count;
            }
        }
        if let Some(history) = &mut self.history {
            history.record(time, count);
        }
        self.last_time = time;
        self.last_count = count;
        Ok(())
    }

    /// Observes a change of the count by `delta` at `time`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrderObservation`] if `time` precedes the last observation.
    pub fn observe_change(&mut self, delta: f64, time: Duration) -> Result<()> {
        self.observe_count(self.last_count + delta, time)
    }

    /// Pauses at the time of the last observation.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Accounts for the time until `time`, then pauses the counter.
    /// While paused, neither the time nor the count is integrated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrderObservation`] if `time` precedes the last observation.
    pub fn pause_at(&mut self, time: Duration) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        self.observe_count(self.last_count, time)?;
        self.paused = true;
        Ok(())
    }

    /// Resumes a paused counter at `time`. The paused period is excluded from all statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrderObservation`] if `time` precedes the last observation.
    pub fn resume(&mut self, time: Duration) -> Result<()> {
        if !self.paused {
            return Ok(());
        }
        if time < self.last_time {
            return Err(Error::OutOfOrderObservation {
                time,
                last: self.last_time,
            });
        }
        self.last_time = time;
        self.paused = false;
        Ok(())
    }

    /// Discards all accumulated statistics as if the counter was created at `time` with its
    /// current count. The pause state is kept.
    pub fn warmed_up(&mut self, time: Duration) {
        self.initial_time = time;
        self.last_time = time;
        self.total_increment = 0.0;
        self.total_decrement = 0.0;
        self.total_hours = 0.0;
        self.cum_value = 0.0;
        self.hours_for_count.clear();
        if let Some(history) = &mut self.history {
            history.entries.clear();
        }
    }

    /// Restores the counter to a fresh state at `time`: zero count, not paused.
    pub fn reset(&mut self, time: Duration) {
        self.warmed_up(time);
        self.last_count = 0.0;
        self.paused = false;
    }

    /// Time of the last observation.
    #[must_use]
    pub fn last_time(&self) -> Duration {
        self.last_time
    }

    /// Count at the last observation.
    #[must_use]
    pub fn last_count(&self) -> f64 {
        self.last_count
    }

    /// Whether the counter is paused.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Total increment observed.
    #[must_use]
    pub fn total_increment(&self) -> f64 {
        self.total_increment
    }

    /// Total decrement observed.
    #[must_use]
    pub fn total_decrement(&self) -> f64 {
        self.total_decrement
    }

    /// Increments per hour.
    #[must_use]
    pub fn increment_rate(&self) -> f64 {
        self.total_increment / self.total_hours
    }

    /// Decrements per hour.
    #[must_use]
    pub fn decrement_rate(&self) -> f64 {
        self.total_decrement / self.total_hours
    }

    /// Total number of observed (non-paused) hours.
    #[must_use]
    pub fn total_hours(&self) -> f64 {
        self.total_hours
    }

    /// Fraction of time since the initial time during which the counter was not paused.
    #[must_use]
    pub fn working_time_ratio(&self) -> f64 {
        let elapsed = hours_between(self.initial_time, self.last_time);
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_hours / elapsed
        }
    }

    /// The cumulative count value over time, in count-hours.
    #[must_use]
    pub fn cum_value(&self) -> f64 {
        self.cum_value
    }

    /// The average count over the observed period.
    /// Before any time has been observed, it is the last count.
    #[must_use]
    pub fn average_count(&self) -> f64 {
        if self.total_hours == 0.0 {
            self.last_count
        } else {
            self.cum_value / self.total_hours
        }
    }

    /// The average count over the observed period extended until `now`, assuming the count has
    /// not changed since the last observation. Does not modify the counter.
    #[must_use]
    pub fn average_count_at(&self, now: Duration) -> f64 {
        if self.paused {
            return self.average_count();
        }
        let hours = hours_between(self.last_time, now);
        let total_hours = self.total_hours + hours;
        if total_hours == 0.0 {
            self.last_count
        } else {
            (self.cum_value + hours * self.last_count) / total_hours
        }
    }

    /// Average time a unit stays counted, by Little's law, assuming a stationary process where
    /// the decrement rate equals the increment rate.
    /// It is zero while no decrement has been observed.
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        let hours = self.average_count() / self.decrement_rate();
        if hours.is_finite() && hours > 0.0 {
            Duration::from_secs_f64(hours * SECONDS_PER_HOUR)
        } else {
            Duration::default()
        }
    }

    /// Hours spent at each observed count, in increasing order of the count.
    pub fn hours_for_count(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.hours_for_count
            .iter()
            .map(|(count, hours)| (count.into_inner(), *hours))
    }

    /// The smallest count `c` such that the count was at most `c` for at least `ratio` of the
    /// observed time. Returns the last count if no time has been observed.
    #[must_use]
    pub fn percentile(&self, ratio: f64) -> f64 {
        let threshold = self.total_hours * ratio.max(0.0).min(1.0);
        let mut accumulated = 0.0;
        for (count, hours) in self.hours_for_count() {
            accumulated += hours;
            if accumulated >= threshold && accumulated > 0.0 {
                return count;
            }
        }
        self.last_count
    }

    /// Recorded `(time, count)` observations, oldest first. Empty if history is not kept.
    pub fn history(&self) -> impl Iterator<Item = (Duration, f64)> + '_ {
        self.history
            .iter()
            .flat_map(|history| history.entries.iter().copied())
    }
}
