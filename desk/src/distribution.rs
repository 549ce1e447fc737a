//! Random streams and samplers of time intervals.
//!
//! Every sandbox owns a [`SimRng`], and components sample their intervals through [`Sampler`]
//! and [`LoadSampler`] closures that draw from that stream. The helpers in this module wrap any
//! [`Distribution<f64>`](rand_distr::Distribution) into a sampler, interpreting its values in a
//! given [`TimeUnit`].

use std::rc::Rc;
use std::time::Duration;

use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

/// Random number generator owned by each sandbox.
pub type SimRng = rand_chacha::ChaChaRng;

/// Samples a time interval from a random stream.
pub type Sampler = Rc<dyn Fn(&mut SimRng) -> Duration>;

/// Samples a time interval from a random stream, depending on the load being processed.
pub type LoadSampler<L> = Rc<dyn Fn(&mut SimRng, &L) -> Duration>;

/// Unit in which float samples are interpreted.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Nanoseconds.
    Nano,
    /// Microseconds.
    Micro,
    /// Milliseconds.
    Milli,
    /// Seconds.
    Second,
    /// Minutes.
    Minute,
    /// Hours.
    Hour,
    /// Days.
    Day,
}

impl Default for TimeUnit {
    fn default() -> Self {
        Self::Second
    }
}

impl TimeUnit {
    /// Number of seconds in one unit.
    #[must_use]
    pub fn seconds(self) -> f64 {
        match self {
            Self::Nano => 1e-9,
            Self::Micro => 1e-6,
            Self::Milli => 1e-3,
            Self::Second => 1.0,
            Self::Minute => 60.0,
            Self::Hour => 3600.0,
            Self::Day => 86400.0,
        }
    }

    /// Converts `value` units into a duration. Negative and NaN values become zero, values too
    /// large to represent saturate at the maximum duration.
    #[must_use]
    pub fn duration(self, value: f64) -> Duration {
        let seconds = value * self.seconds();
        match seconds.partial_cmp(&0_f64) {
            None | Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal) => {
                Duration::default()
            }
            _ => Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX),
        }
    }
}

/// Wraps a float distribution into a sampler, interpreting its values in `unit`.
///
/// # Examples
///
/// ```
/// # use desk::distribution::{sampler, TimeUnit};
/// # use rand::SeedableRng;
/// # use std::time::Duration;
/// let uniform = rand_distr::Uniform::new(1.0, 2.0);
/// let sample = sampler(uniform, TimeUnit::Hour);
/// let mut rng = desk::SimRng::seed_from_u64(17);
/// let interval = sample(&mut rng);
/// assert!(interval >= Duration::from_secs(3600));
/// assert!(interval < Duration::from_secs(7200));
/// ```
pub fn sampler<D>(dist: D, unit: TimeUnit) -> Sampler
where
    D: Distribution<f64> + 'static,
{
    Rc::new(move |rng: &mut SimRng| unit.duration(dist.sample(rng)))
}

/// Wraps a float distribution into a load sampler ignoring the load.
pub fn load_sampler<L, D>(dist: D, unit: TimeUnit) -> LoadSampler<L>
where
    D: Distribution<f64> + 'static,
{
    Rc::new(move |rng: &mut SimRng, _: &L| unit.duration(dist.sample(rng)))
}

/// A sampler that always returns `interval`.
#[must_use]
pub fn constant(interval: Duration) -> Sampler {
    Rc::new(move |_: &mut SimRng| interval)
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::SeedableRng;
    use testing::{ConstantDistribution, SequenceDistribution};

    #[test]
    fn test_duration_clamps() {
        assert_eq!(TimeUnit::Second.duration(-1.0), Duration::default());
        assert_eq!(TimeUnit::Second.duration(f64::NAN), Duration::default());
        assert_eq!(TimeUnit::Second.duration(f64::INFINITY), Duration::MAX);
        assert_eq!(TimeUnit::Day.duration(0.5), Duration::from_secs(43_200));
        assert_eq!(TimeUnit::Minute.duration(1.5), Duration::from_secs(90));
    }

    #[test]
    fn test_samplers() {
        let mut rng = SimRng::seed_from_u64(0);
        let sample = sampler(SequenceDistribution::new(vec![1.0, 2.0]), TimeUnit::Minute);
        assert_eq!(sample(&mut rng), Duration::from_secs(60));
        assert_eq!(sample(&mut rng), Duration::from_secs(120));
        let sample = load_sampler::<u32, _>(ConstantDistribution::new(3.0), TimeUnit::Hour);
        assert_eq!(sample(&mut rng, &7), Duration::from_secs(3 * 3600));
        assert_eq!(constant(Duration::from_secs(4))(&mut rng), Duration::from_secs(4));
    }

    #[test]
    fn test_time_unit_from_json() {
        let unit: TimeUnit = serde_json::from_str("\"day\"").unwrap();
        assert_eq!(unit, TimeUnit::Day);
    }
}
