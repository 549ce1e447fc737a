use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

use super::{log_prefix, ArrivalProcess};
use crate::{Error, Load, ObserverId, Observers, Result, SandboxId, Simulation, TimeUnit};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Factors repeating every `factors.len()` intervals of length `interval`, counted from the
/// start of the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSeasonality {
    /// Length of a single interval.
    pub interval: Duration,
    /// One factor per interval.
    pub factors: Vec<f64>,
}

/// Configuration of a [`PatternGenerator`].
///
/// Every list of seasonal factors is normalized to a mean of 1. Missing lists, or lists with no
/// positive factor, mean no seasonal effect. Negative factors count as zeros, and fixed-length
/// lists are truncated or padded with zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternGeneratorConfig {
    /// Mean number of arrivals per hour over the whole pattern.
    pub mean_hourly_rate: f64,
    /// 24 factors, starting at midnight.
    pub hours_of_day: Option<Vec<f64>>,
    /// 7 factors, starting on Sunday.
    pub days_of_week: Option<Vec<f64>>,
    /// 31 factors, adjusted for the length of each month.
    pub days_of_month: Option<Vec<f64>>,
    /// 12 factors, starting in January.
    pub months_of_year: Option<Vec<f64>>,
    /// Factors of consecutive years, starting at year 1 and wrapping around.
    pub years: Option<Vec<f64>>,
    /// Any number of custom periodic patterns.
    pub custom: Vec<CustomSeasonality>,
    /// Calendar date and time corresponding to simulation time zero.
    pub epoch: NaiveDateTime,
}

impl Default for PatternGeneratorConfig {
    fn default() -> Self {
        Self {
            mean_hourly_rate: 1.0,
            hours_of_day: None,
            days_of_week: None,
            days_of_month: None,
            months_of_year: None,
            years: None,
            custom: Vec::new(),
            epoch: NaiveDate::from_ymd_opt(1, 1, 1)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .expect("0001-01-01 is a valid date"),
        }
    }
}

/// Normalized factors of one seasonal dimension.
#[derive(Debug, Clone, PartialEq)]
struct Seasonality {
    factors: Vec<f64>,
    max: f64,
}

impl Seasonality {
    #[allow(clippy::float_cmp)]
    fn new(factors: Option<&[f64]>, len: Option<usize>) -> Self {
        let uniform = || vec![1.0; len.unwrap_or(1)];
        let factors = match factors {
            Some(raw) if raw.iter().sum::<f64>() != 0.0 => {
                let mut clamped: Vec<f64> = raw.iter().map(|&f| f.max(0.0)).collect();
                if let Some(len) = len {
                    clamped.resize(len, 0.0);
                }
                let sum: f64 = clamped.iter().sum();
                if sum > 0.0 {
                    let count = clamped.len() as f64;
                    clamped.iter().map(|f| f / sum * count).collect()
                } else {
                    uniform()
                }
            }
            _ => uniform(),
        };
        let max = factors.iter().copied().fold(0.0, f64::max);
        Self { factors, max }
    }

    fn len(&self) -> usize {
        self.factors.len()
    }

    fn acceptance(&self, index: usize) -> f64 {
        self.factors[index] / self.max
    }
}

#[derive(Debug, Clone)]
struct Custom {
    interval_hours: f64,
    seasonality: Seasonality,
}

/// Normalized arrival pattern.
#[derive(Debug, Clone)]
struct Pattern {
    epoch: NaiveDateTime,
    peak_hourly_rate: f64,
    peak: Exp<f64>,
    hours_of_day: Seasonality,
    days_of_week: Seasonality,
    days_of_month: Seasonality,
    months_of_year: Seasonality,
    years: Seasonality,
    custom: Vec<Custom>,
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

impl Pattern {
    fn new(config: &PatternGeneratorConfig) -> Result<Self> {
        let rate = config.mean_hourly_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::Configuration(format!(
                "mean hourly rate must be positive, got {}",
                rate
            )));
        }
        let custom = config
            .custom
            .iter()
            .map(|custom| {
                if custom.interval == Duration::default() {
                    return Err(Error::Configuration(String::from(
                        "custom seasonality interval must be positive",
                    )));
                }
                Ok(Custom {
                    interval_hours: custom.interval.as_secs_f64() / SECONDS_PER_HOUR,
                    seasonality: Seasonality::new(Some(custom.factors.as_slice()), None),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let hours_of_day = Seasonality::new(config.hours_of_day.as_deref(), Some(24));
        let days_of_week = Seasonality::new(config.days_of_week.as_deref(), Some(7));
        let days_of_month = Seasonality::new(config.days_of_month.as_deref(), Some(31));
        let months_of_year = Seasonality::new(config.months_of_year.as_deref(), Some(12));
        let years = Seasonality::new(config.years.as_deref(), None);
        let peak_hourly_rate = [
            &hours_of_day,
            &days_of_week,
            &days_of_month,
            &months_of_year,
            &years,
        ]
        .iter()
        .map(|seasonality| seasonality.max)
        .chain(custom.iter().map(|custom| custom.seasonality.max))
        .fold(rate, |peak, max| peak * max);
        let peak = Exp::new(peak_hourly_rate).map_err(|_| {
            Error::Configuration(format!("invalid peak hourly rate {}", peak_hourly_rate))
        })?;
        Ok(Self {
            epoch: config.epoch,
            peak_hourly_rate,
            peak,
            hours_of_day,
            days_of_week,
            days_of_month,
            months_of_year,
            years,
            custom,
        })
    }

    fn calendar(&self, time: Duration) -> Result<NaiveDateTime> {
        chrono::Duration::from_std(time)
            .ok()
            .and_then(|offset| self.epoch.checked_add_signed(offset))
            .ok_or(Error::TimeOutOfRange(time))
    }

    /// Thinning: candidates arrive at the peak rate, each accepted with the ratio of the factors
    /// at the candidate time to their maxima.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    fn next_arrival<R: Rng>(
        &self,
        rng: &mut R,
        remainders: &mut [f64],
        mut time: Duration,
    ) -> Result<Duration> {
        loop {
            let hours = self.peak.sample(rng);
            let custom_indices: Vec<usize> = self
                .custom
                .iter()
                .zip(remainders.iter_mut())
                .map(|(custom, remainder)| {
                    let len = custom.seasonality.len();
                    let elapsed = *remainder + hours;
                    *remainder = elapsed % (custom.interval_hours * len as f64);
                    (elapsed / custom.interval_hours).floor() as usize % len
                })
                .collect();
            let delay = TimeUnit::Hour.duration(hours);
            time = time
                .checked_add(delay)
                .ok_or(Error::TimeOverflow {
                    current: time,
                    delay,
                })?;
            let date = self.calendar(time)?;
            let day_of_month_scale = 31.0 / f64::from(days_in_month(date.date()));
            let year_index = (date.year() - 1).rem_euclid(self.years.len() as i32) as usize;
            let accepted = rng.gen::<f64>()
                <= self.hours_of_day.acceptance(date.hour() as usize)
                && rng.gen::<f64>()
                    <= self
                        .days_of_week
                        .acceptance(date.weekday().num_days_from_sunday() as usize)
                && rng.gen::<f64>()
                    <= self.days_of_month.acceptance(date.day0() as usize) * day_of_month_scale
                && rng.gen::<f64>() <= self.months_of_year.acceptance(date.month0() as usize)
                && rng.gen::<f64>() <= self.years.acceptance(year_index)
                && self
                    .custom
                    .iter()
                    .zip(custom_indices)
                    .all(|(custom, index)| rng.gen::<f64>() <= custom.seasonality.acceptance(index));
            if accepted {
                return Ok(time);
            }
        }
    }
}

struct State {
    pattern: Pattern,
    remainders: Vec<f64>,
    is_on: bool,
    start_time: Option<Duration>,
    count: usize,
    on_arrive: Observers<Load>,
}

/// Generates arrivals following a non-homogeneous Poisson process, whose intensity varies with
/// the hour of the day, day of the week, day of the month, month, year, and custom periods.
///
/// Calendar fields are computed from [`PatternGeneratorConfig::epoch`] offset by the clock.
#[derive(Clone)]
pub struct PatternGenerator {
    sandbox: SandboxId,
    state: Rc<RefCell<State>>,
}

impl PatternGenerator {
    /// Creates a generator in the off state, owning a new sandbox seeded with `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the mean hourly rate is not positive or a custom
    /// seasonality has a zero interval.
    pub fn new(
        simulation: &mut Simulation,
        config: PatternGeneratorConfig,
        seed: u64,
        id: Option<&str>,
    ) -> Result<Self> {
        let pattern = Pattern::new(&config)?;
        let sandbox = simulation.create_sandbox(seed, Some(id.unwrap_or("PatternGenerator")));
        let state = Rc::new(RefCell::new(State {
            remainders: vec![0.0; pattern.custom.len()],
            pattern,
            is_on: false,
            start_time: None,
            count: 0,
            on_arrive: Observers::default(),
        }));
        let weak = Rc::downgrade(&state);
        simulation.add_warm_up_handler(sandbox, move |_| {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().count = 0;
            }
        });
        let weak = Rc::downgrade(&state);
        simulation.add_reset_handler(sandbox, move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.borrow_mut();
                state.is_on = false;
                state.start_time = None;
                state.count = 0;
                state.remainders.iter_mut().for_each(|remainder| *remainder = 0.0);
            }
        });
        Ok(Self { sandbox, state })
    }

    /// Arrival rate per hour at the busiest time of the pattern.
    #[must_use]
    pub fn peak_hourly_rate(&self) -> f64 {
        self.state.borrow().pattern.peak_hourly_rate
    }

    fn schedule_arrival(&self, simulation: &mut Simulation) -> Result<()> {
        let now = simulation.clock_time(self.sandbox);
        let time = {
            let mut state = self.state.borrow_mut();
            let State {
                pattern,
                remainders,
                ..
            } = &mut *state;
            pattern.next_arrival(simulation.rng(self.sandbox), remainders, now)?
        };
        let generator = self.clone();
        simulation.schedule_tagged(self.sandbox, time, "arrive", move |simulation| {
            generator.arrive(simulation)
        })?;
        Ok(())
    }

    fn arrive(&self, simulation: &mut Simulation) -> Result<()> {
        let notifier = {
            let mut state = self.state.borrow_mut();
            if !state.is_on {
                return Ok(());
            }
            state.count += 1;
            state.on_arrive.notifier()
        };
        self.schedule_arrival(simulation)?;
        let load = simulation.new_load();
        log::debug!("{} Arrive {}", log_prefix(simulation, self.sandbox), load);
        notifier.notify(simulation, &load)
    }

    /// Removes an arrival observer. Returns `false` if it was not subscribed.
    pub fn remove_on_arrive(&self, id: ObserverId) -> bool {
        self.state.borrow_mut().on_arrive.unsubscribe(id)
    }

    /// Disposes the sandbox and drops all observers.
    pub fn dispose(&self, simulation: &mut Simulation) {
        self.state.borrow_mut().on_arrive.clear();
        simulation.dispose(self.sandbox);
    }
}

impl ArrivalProcess for PatternGenerator {
    fn sandbox(&self) -> SandboxId {
        self.sandbox
    }

    fn start(&self, simulation: &mut Simulation) -> Result<()> {
        if simulation.is_disposed(self.sandbox) {
            return Err(Error::Disposed(self.sandbox));
        }
        {
            let mut state = self.state.borrow_mut();
            if state.is_on {
                return Ok(());
            }
            state.is_on = true;
            state.start_time = Some(simulation.clock_time(self.sandbox));
            state.count = 0;
        }
        log::debug!("{} Start", log_prefix(simulation, self.sandbox));
        self.schedule_arrival(simulation)
    }

    fn end(&self, simulation: &mut Simulation) {
        let mut state = self.state.borrow_mut();
        if state.is_on {
            log::debug!("{} End", log_prefix(simulation, self.sandbox));
            state.is_on = false;
        }
    }

    fn is_on(&self) -> bool {
        self.state.borrow().is_on
    }

    fn start_time(&self) -> Option<Duration> {
        self.state.borrow().start_time
    }

    fn count(&self) -> usize {
        self.state.borrow().count
    }

    fn on_arrive<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&mut Simulation, &Load) -> Result<()> + 'static,
    {
        self.state.borrow_mut().on_arrive.subscribe(observer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Weekday;
    use float_cmp::approx_eq;
    use rstest::{fixture, rstest};

    const DAY: u64 = 24 * 3600;

    #[fixture]
    fn config() -> PatternGeneratorConfig {
        PatternGeneratorConfig {
            mean_hourly_rate: 2.0,
            ..PatternGeneratorConfig::default()
        }
    }

    /// Runs a started generator for `days` and returns the arrival times.
    fn arrivals(config: &PatternGeneratorConfig, days: u64) -> Vec<Duration> {
        let mut sim = Simulation::new();
        let generator = PatternGenerator::new(&mut sim, config.clone(), 11, None).unwrap();
        let times = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&times);
        let sandbox = generator.sandbox();
        generator.on_arrive(move |sim, _| {
            log.borrow_mut().push(sim.clock_time(sandbox));
            Ok(())
        });
        generator.start(&mut sim).unwrap();
        sim.run_until(sandbox, Duration::from_secs(days * DAY))
            .unwrap();
        assert_eq!(generator.count(), times.borrow().len());
        let times = times.borrow().clone();
        times
    }

    fn calendar(config: &PatternGeneratorConfig, time: Duration) -> NaiveDateTime {
        config.epoch + chrono::Duration::from_std(time).unwrap()
    }

    #[test]
    fn test_normalization() {
        let uniform = Seasonality::new(None, Some(3));
        assert_eq!(uniform.factors, vec![1.0, 1.0, 1.0]);
        assert_eq!(Seasonality::new(Some(&[0.0, 0.0][..]), Some(2)), uniform_of(2));
        assert_eq!(Seasonality::new(Some(&[-1.0, -3.0][..]), None), uniform_of(1));
        assert_eq!(Seasonality::new(Some(&[-1.0, 1.0][..]), Some(2)), uniform_of(2));
        assert_eq!(Seasonality::new(Some(&[-1.0, 3.0][..]), None).factors, vec![0.0, 2.0]);

        let padded = Seasonality::new(Some(&[3.0, -1.0][..]), Some(3));
        assert_eq!(padded.factors, vec![3.0, 0.0, 0.0]);
        assert_eq!(padded.max, 3.0);

        let truncated = Seasonality::new(Some(&[1.0, 3.0, 100.0][..]), Some(2));
        assert_eq!(truncated.factors, vec![0.5, 1.5]);
        assert_eq!(truncated.acceptance(0), 1.0 / 3.0);
    }

    fn uniform_of(len: usize) -> Seasonality {
        Seasonality {
            factors: vec![1.0; len],
            max: 1.0,
        }
    }

    #[rstest]
    fn test_peak_rate(mut config: PatternGeneratorConfig) {
        let mut hours = vec![1.0; 24];
        hours[0] = 3.0;
        config.hours_of_day = Some(hours);
        config.days_of_week = Some(vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 8.0]);
        config.custom = vec![CustomSeasonality {
            interval: Duration::from_secs(60),
            factors: vec![1.0, 3.0],
        }];
        let pattern = Pattern::new(&config).unwrap();
        let expected = 2.0 * (3.0 * 24.0 / 26.0) * (8.0 * 7.0 / 14.0) * 1.5;
        assert!(approx_eq!(
            f64,
            pattern.peak_hourly_rate,
            expected,
            epsilon = 1e-9
        ));
    }

    #[rstest]
    fn test_invalid_config(mut config: PatternGeneratorConfig) {
        let mut sim = Simulation::new();
        config.mean_hourly_rate = 0.0;
        assert!(matches!(
            PatternGenerator::new(&mut sim, config.clone(), 0, None),
            Err(Error::Configuration(_))
        ));
        config.mean_hourly_rate = 1.0;
        config.custom = vec![CustomSeasonality {
            interval: Duration::default(),
            factors: vec![1.0],
        }];
        assert!(matches!(
            PatternGenerator::new(&mut sim, config.clone(), 0, None),
            Err(Error::Configuration(_))
        ));
    }

    #[rstest]
    fn test_reset_replays_arrivals(config: PatternGeneratorConfig) {
        let mut sim = Simulation::new();
        let generator = PatternGenerator::new(&mut sim, config, 5, None).unwrap();
        let sandbox = generator.sandbox();
        let times = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&times);
        generator.on_arrive(move |sim, _| {
            log.borrow_mut().push(sim.clock_time(sandbox));
            Ok(())
        });
        generator.start(&mut sim).unwrap();
        sim.run_until(sandbox, Duration::from_secs(DAY)).unwrap();
        let first_run = times.replace(Vec::new());
        assert!(!first_run.is_empty());

        sim.reset(sandbox);
        assert!(!generator.is_on());
        assert_eq!(generator.count(), 0);
        generator.start(&mut sim).unwrap();
        sim.run_until(sandbox, Duration::from_secs(DAY)).unwrap();
        assert_eq!(*times.borrow(), first_run);
        assert_eq!(generator.count(), first_run.len());
    }

    #[rstest]
    fn test_homogeneous_rate(config: PatternGeneratorConfig) {
        let times = arrivals(&config, 50);
        // expected 2400 arrivals
        assert!(times.len() > 2100 && times.len() < 2700, "{}", times.len());
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[rstest]
    fn test_single_hour_of_day(mut config: PatternGeneratorConfig) {
        let mut hours = vec![0.0; 24];
        hours[9] = 1.0;
        config.hours_of_day = Some(hours);
        let times = arrivals(&config, 10);
        // expected 480 arrivals, all between 9:00 and 10:00
        assert!(times.len() > 350 && times.len() < 610, "{}", times.len());
        assert!(times
            .iter()
            .all(|&time| calendar(&config, time).hour() == 9));
    }

    #[rstest]
    fn test_single_day_of_week(mut config: PatternGeneratorConfig) {
        config.days_of_week = Some(vec![1.0]);
        let times = arrivals(&config, 21);
        assert!(!times.is_empty());
        assert!(times
            .iter()
            .all(|&time| calendar(&config, time).weekday() == Weekday::Sun));
    }

    #[rstest]
    fn test_custom_seasonality(mut config: PatternGeneratorConfig) {
        config.custom = vec![CustomSeasonality {
            interval: Duration::from_secs(3600),
            factors: vec![1.0, 0.0],
        }];
        let times = arrivals(&config, 5);
        assert!(!times.is_empty());
        assert!(times
            .iter()
            .all(|time| (time.as_secs() / 3600) % 2 == 0));
    }

    #[test]
    fn test_config_from_json() {
        let config: PatternGeneratorConfig = serde_json::from_str(
            r#"{"mean_hourly_rate": 4.5, "months_of_year": [1, 2], "epoch": "2020-02-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(config.mean_hourly_rate, 4.5);
        assert_eq!(config.months_of_year, Some(vec![1.0, 2.0]));
        assert!(config.hours_of_day.is_none());
        assert!(config.custom.is_empty());
        assert_eq!(config.epoch.year(), 2020);
        assert_eq!(
            PatternGeneratorConfig::default().epoch.date(),
            NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_days_in_month() {
        let days = |y, m| days_in_month(NaiveDate::from_ymd_opt(y, m, 10).unwrap());
        assert_eq!(days(2021, 2), 28);
        assert_eq!(days(2020, 2), 29);
        assert_eq!(days(2020, 12), 31);
        assert_eq!(days(2020, 4), 30);
    }
}
