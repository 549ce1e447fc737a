//! Port simulation: ships arrive at random, wait at the anchorage, and are served at berths.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use eyre::{ensure, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::{Itertools, MinMaxResult};
use rand_distr::{Exp, Uniform};
use serde::{Deserialize, Serialize};

use desk::distribution::{load_sampler, sampler};
use desk::standard::{ArrivalProcess, Generator, GeneratorConfig, Queue, Server, ServerConfig};
use desk::{Load, SandboxId, Simulation, TimeUnit};

const DAY: Duration = Duration::from_secs(24 * 3600);

/// Runs the port simulation.
#[derive(Parser)]
#[clap(version, author)]
struct Opt {
    /// Path to a JSON file with the port configuration; command line options take precedence.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Random seed.
    #[clap(long)]
    seed: Option<u64>,

    /// Number of berths.
    #[clap(long)]
    berths: Option<f64>,

    /// Mean time between ship arrivals, in days.
    #[clap(long)]
    arrival_mean: Option<f64>,

    /// Minimum service time, in days.
    #[clap(long)]
    service_min: Option<f64>,

    /// Maximum service time, in days.
    #[clap(long)]
    service_max: Option<f64>,

    /// Length of the warm-up period, in days.
    #[clap(long)]
    warm_up: Option<f64>,

    /// Length of the measured period, in days.
    #[clap(long)]
    days: Option<u64>,

    /// Verbosity.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    /// Store the logs this file.
    #[clap(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[clap(long)]
    no_stderr: bool,

    /// Print the summary in JSON format.
    #[clap(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PortConfig {
    seed: u64,
    berths: f64,
    arrival_mean: f64,
    service_min: f64,
    service_max: f64,
    warm_up: f64,
    days: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            berths: 2.0,
            arrival_mean: 1.25,
            service_min: 0.5,
            service_max: 1.5,
            warm_up: 30.0,
            days: 365,
        }
    }
}

impl PortConfig {
    fn from_opt(opt: &Opt) -> eyre::Result<Self> {
        let mut config = if let Some(path) = &opt.config {
            let file = File::open(path)
                .wrap_err_with(|| format!("unable to open config: {}", path.display()))?;
            serde_json::from_reader(file).wrap_err("unable to parse port config")?
        } else {
            Self::default()
        };
        config.seed = opt.seed.unwrap_or(config.seed);
        config.berths = opt.berths.unwrap_or(config.berths);
        config.arrival_mean = opt.arrival_mean.unwrap_or(config.arrival_mean);
        config.service_min = opt.service_min.unwrap_or(config.service_min);
        config.service_max = opt.service_max.unwrap_or(config.service_max);
        config.warm_up = opt.warm_up.unwrap_or(config.warm_up);
        config.days = opt.days.unwrap_or(config.days);
        ensure!(config.arrival_mean > 0.0, "arrival mean must be positive");
        ensure!(
            0.0 <= config.service_min && config.service_min < config.service_max,
            "invalid service time range"
        );
        Ok(config)
    }
}

/// Time stamps of a single ship.
#[derive(Debug, Clone, Copy, Default)]
struct Ship {
    arrive: Duration,
    start: Duration,
    end: Duration,
}

#[derive(Debug, Default)]
struct ShipLog {
    active: HashMap<Load, Ship>,
    finished: Vec<Ship>,
}

/// The port model: a generator of ships, an unbounded anchorage, and the berths.
struct Port {
    root: SandboxId,
    anchorage: Queue<Load>,
    berths: Server<Load>,
    ships: Rc<RefCell<ShipLog>>,
}

impl Port {
    fn new(sim: &mut Simulation, config: &PortConfig) -> eyre::Result<(Self, Generator)> {
        let root = sim.create_sandbox(config.seed, Some("Port"));
        let arrivals = Exp::new(1.0 / config.arrival_mean).wrap_err("invalid arrival mean")?;
        let generator = Generator::new(
            sim,
            GeneratorConfig {
                inter_arrival_time: Some(sampler(arrivals, TimeUnit::Day)),
            },
            config.seed + 1,
            Some("Arrivals"),
        )?;
        let anchorage = Queue::new(sim, f64::INFINITY, config.seed + 2, Some("Anchorage"))?;
        let berths = Server::new(
            sim,
            ServerConfig {
                capacity: config.berths,
                service_time: Some(load_sampler(
                    Uniform::new(config.service_min, config.service_max),
                    TimeUnit::Day,
                )),
            },
            config.seed + 3,
            Some("Berths"),
        )?;
        sim.add_child(root, generator.sandbox())?;
        sim.add_child(root, anchorage.sandbox())?;
        sim.add_child(root, berths.sandbox())?;

        let ships = Rc::new(RefCell::new(ShipLog::default()));
        {
            let ships = Rc::clone(&ships);
            sim.add_warm_up_handler(root, move |_| ships.borrow_mut().finished.clear());
        }
        {
            let ships = Rc::clone(&ships);
            let anchorage = anchorage.clone();
            generator.on_arrive(move |sim, ship| {
                let arrive = sim.clock_time(root);
                ships.borrow_mut().active.insert(
                    *ship,
                    Ship {
                        arrive,
                        ..Ship::default()
                    },
                );
                anchorage.request_enqueue(sim, *ship)
            });
        }
        {
            let berths = berths.clone();
            anchorage.on_enqueued(move |sim, ship| berths.request_start(sim, *ship));
        }
        {
            let ships = Rc::clone(&ships);
            let anchorage = anchorage.clone();
            berths.on_started(move |sim, ship| {
                if let Some(times) = ships.borrow_mut().active.get_mut(ship) {
                    times.start = sim.clock_time(root);
                }
                anchorage.dequeue(sim, ship).map(|_| ())
            });
        }
        {
            let ships = Rc::clone(&ships);
            let handle = berths.clone();
            berths.on_ready_to_depart(move |sim, ship| {
                {
                    let mut log = ships.borrow_mut();
                    if let Some(mut times) = log.active.remove(ship) {
                        times.end = sim.clock_time(root);
                        log.finished.push(times);
                    }
                }
                handle.depart(sim, ship).map(|_| ())
            });
        }
        Ok((
            Self {
                root,
                anchorage,
                berths,
                ships,
            },
            generator,
        ))
    }

    fn summary(&self, sim: &Simulation) -> Summary {
        let ships = self.ships.borrow();
        let days = |d: Duration| d.as_secs_f64() / DAY.as_secs_f64();
        let cycle_times: Vec<f64> = ships
            .finished
            .iter()
            .map(|ship| days(ship.end - ship.arrive))
            .collect();
        let mean = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };
        let waiting_times: Vec<f64> = ships
            .finished
            .iter()
            .map(|ship| days(ship.start - ship.arrive))
            .collect();
        let (min_cycle_time, max_cycle_time) = match cycle_times.iter().minmax_by(|a, b| {
            a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            MinMaxResult::NoElements => (0.0, 0.0),
            MinMaxResult::OneElement(value) => (*value, *value),
            MinMaxResult::MinMax(min, max) => (*min, *max),
        };
        Summary {
            ships: cycle_times.len(),
            average_cycle_time: mean(&cycle_times),
            min_cycle_time,
            max_cycle_time,
            average_waiting_time: mean(&waiting_times),
            average_anchorage: self.anchorage.avg_n_queueing(sim),
            berth_utilization: self.berths.util_occupying(sim),
        }
    }
}

/// Statistics of the measured period; times in days.
#[derive(Debug, Serialize)]
struct Summary {
    ships: usize,
    average_cycle_time: f64,
    min_cycle_time: f64,
    max_cycle_time: f64,
    average_waiting_time: f64,
    average_anchorage: f64,
    berth_utilization: f64,
}

fn run(config: &PortConfig, show_progress: bool) -> eyre::Result<Summary> {
    let mut sim = Simulation::new();
    let (port, generator) = Port::new(&mut sim, config)?;
    generator.start(&mut sim)?;
    sim.warm_up_for(port.root, TimeUnit::Day.duration(config.warm_up))?;
    log::info!("Warm-up finished at {:?}", sim.clock_time(port.root));

    let pb = if show_progress {
        ProgressBar::new(config.days)
    } else {
        ProgressBar::hidden()
    };
    pb.set_length(config.days);
    pb.set_style(ProgressStyle::default_bar().template("{msg} {wide_bar} {percent}%"));
    for day in 1..=config.days {
        sim.run_for(port.root, DAY)?;
        pb.set_position(day);
        pb.set_message(&format!(
            "[day {day}] [A={anchorage}] [B={berths}] [F={finished}]",
            day = day,
            anchorage = port.anchorage.occupancy(),
            berths = port.berths.occupancy(),
            finished = port.ships.borrow().finished.len(),
        ));
    }
    pb.finish();
    Ok(port.summary(&sim))
}

/// Set up a logger based on the given user options.
fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let log_level = match opt.verbose {
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        3 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    };
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log_level);
    let dispatch = if let Some(path) = &opt.log_output {
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(std::io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt)?;
    let config = PortConfig::from_opt(&opt)?;
    log::info!("Running with {:?}", config);
    let summary = run(&config, !opt.no_stderr)?;
    if opt.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Ships served:          {}", summary.ships);
        println!("Average cycle time:    {:.3} days", summary.average_cycle_time);
        println!(
            "Cycle time range:      {:.3} - {:.3} days",
            summary.min_cycle_time, summary.max_cycle_time
        );
        println!("Average waiting time:  {:.3} days", summary.average_waiting_time);
        println!("Average anchorage:     {:.3} ships", summary.average_anchorage);
        println!("Berth utilization:     {:.3}", summary.berth_utilization);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn short_config() -> PortConfig {
        PortConfig {
            seed: 7,
            warm_up: 5.0,
            days: 60,
            ..PortConfig::default()
        }
    }

    #[test]
    fn test_same_seed_same_summary() {
        let first = run(&short_config(), false).unwrap();
        let second = run(&short_config(), false).unwrap();
        assert!(first.ships > 0);
        assert_eq!(first.ships, second.ships);
        assert_eq!(first.average_cycle_time, second.average_cycle_time);
        assert!(first.min_cycle_time > 0.49);
        assert!(first.average_waiting_time <= first.average_cycle_time);
        assert!(first.berth_utilization > 0.0 && first.berth_utilization <= 1.0);
    }

    #[test]
    fn test_config_from_json() {
        let config: PortConfig = serde_json::from_str(r#"{"berths": 1, "days": 10}"#).unwrap();
        assert_eq!(config.berths, 1.0);
        assert_eq!(config.days, 10);
        assert_eq!(config.arrival_mean, 1.25);
    }
}
