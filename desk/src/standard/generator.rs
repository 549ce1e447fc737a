use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::{log_prefix, ArrivalProcess};
use crate::{Error, Load, ObserverId, Observers, Result, SandboxId, Sampler, Simulation};

/// Configuration of a [`Generator`].
#[derive(Clone, Default)]
pub struct GeneratorConfig {
    /// Distribution of the time between consecutive arrivals. Required to start.
    pub inter_arrival_time: Option<Sampler>,
}

struct State {
    config: GeneratorConfig,
    is_on: bool,
    start_time: Option<Duration>,
    count: usize,
    on_arrive: Observers<Load>,
}

/// Generates arrivals separated by intervals sampled from the configured distribution.
///
/// Each arrival mints a new [`Load`] and passes it to the observers subscribed with
/// [`ArrivalProcess::on_arrive`].
#[derive(Clone)]
pub struct Generator {
    sandbox: SandboxId,
    state: Rc<RefCell<State>>,
}

impl Generator {
    /// Creates a generator in the off state, owning a new sandbox seeded with `seed`.
    ///
    /// A missing inter-arrival time is accepted here and reported by [`ArrivalProcess::start`].
    ///
    /// # Errors
    ///
    /// Never fails; shares the constructor shape of [`super::PatternGenerator::new`].
    pub fn new(
        simulation: &mut Simulation,
        config: GeneratorConfig,
        seed: u64,
        id: Option<&str>,
    ) -> Result<Self> {
        let sandbox = simulation.create_sandbox(seed, Some(id.unwrap_or("Generator")));
        let state = Rc::new(RefCell::new(State {
            config,
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
            }
        });
        Ok(Self { sandbox, state })
    }

    fn schedule_arrival(&self, simulation: &mut Simulation) -> Result<()> {
        let inter_arrival_time = self
            .state
            .borrow()
            .config
            .inter_arrival_time
            .clone()
            .ok_or_else(|| {
                Error::Configuration(String::from("generator has no inter-arrival time"))
            })?;
        let interval = inter_arrival_time(simulation.rng(self.sandbox));
        let generator = self.clone();
        simulation.schedule_after_tagged(self.sandbox, interval, "arrive", move |simulation| {
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

impl ArrivalProcess for Generator {
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
            if state.config.inter_arrival_time.is_none() {
                return Err(Error::Configuration(String::from(
                    "generator started without an inter-arrival time",
                )));
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

    use crate::distribution::constant;

    use rstest::{fixture, rstest};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    struct Setup {
        sim: Simulation,
        root: SandboxId,
        generator: Generator,
        arrivals: Rc<RefCell<Vec<(Duration, Load)>>>,
    }

    #[fixture]
    fn setup() -> Setup {
        let mut sim = Simulation::new();
        let root = sim.create_sandbox(0, Some("model"));
        let config = GeneratorConfig {
            inter_arrival_time: Some(constant(secs(10))),
        };
        let generator = Generator::new(&mut sim, config, 1, None).unwrap();
        sim.add_child(root, generator.sandbox()).unwrap();
        let arrivals = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&arrivals);
        generator.on_arrive(move |sim, load| {
            log.borrow_mut().push((sim.clock_time(root), *load));
            Ok(())
        });
        Setup {
            sim,
            root,
            generator,
            arrivals,
        }
    }

    #[rstest]
    fn test_constant_arrivals(setup: Setup) {
        let Setup {
            mut sim,
            root,
            generator,
            arrivals,
        } = setup;
        sim.run_until(root, secs(7)).unwrap();
        generator.start(&mut sim).unwrap();
        assert_eq!(generator.start_time(), Some(secs(7)));
        sim.run_until(root, secs(7 + 5 * 10) + Duration::from_millis(1))
            .unwrap();
        assert_eq!(generator.count(), 5);
        assert_eq!(sim.head_event_time(root), Some(secs(7 + 6 * 10)));
        let times: Vec<_> = arrivals.borrow().iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![secs(17), secs(27), secs(37), secs(47), secs(57)]);
        assert_eq!(arrivals.borrow()[0].1, Load::from(0));
        assert_eq!(sim.label(generator.sandbox()), "Generator#1");
    }

    #[rstest]
    fn test_start_is_idempotent(setup: Setup) {
        let Setup {
            mut sim, generator, ..
        } = setup;
        generator.start(&mut sim).unwrap();
        generator.start(&mut sim).unwrap();
        assert_eq!(sim.pending_events(generator.sandbox()), 1);
    }

    #[rstest]
    fn test_end_suppresses_scheduled_arrival(setup: Setup) {
        let Setup {
            mut sim,
            root,
            generator,
            arrivals,
        } = setup;
        generator.start(&mut sim).unwrap();
        sim.run_until(root, secs(15)).unwrap();
        generator.end(&mut sim);
        generator.end(&mut sim);
        assert!(!generator.is_on());
        assert_eq!(sim.pending_events(generator.sandbox()), 1);
        assert!(!sim.run_until(root, secs(100)).unwrap());
        assert_eq!(arrivals.borrow().len(), 1);
        assert_eq!(generator.count(), 1);
    }

    #[rstest]
    fn test_warm_up_resets_count(setup: Setup) {
        let Setup {
            mut sim,
            root,
            generator,
            ..
        } = setup;
        generator.start(&mut sim).unwrap();
        sim.warm_up_until(root, secs(35)).unwrap();
        assert_eq!(generator.count(), 0);
        assert!(generator.is_on());
        assert_eq!(generator.start_time(), Some(secs(0)));
        assert_eq!(sim.head_event_time(root), Some(secs(40)));
        sim.run_until(root, secs(40)).unwrap();
        assert_eq!(generator.count(), 1);
    }

    #[rstest]
    fn test_unsubscribe_and_dispose(setup: Setup) {
        let Setup {
            mut sim,
            root,
            generator,
            arrivals,
        } = setup;
        assert!(generator.remove_on_arrive(ObserverId::from(0)));
        generator.start(&mut sim).unwrap();
        sim.run_until(root, secs(10)).unwrap();
        assert!(arrivals.borrow().is_empty());
        generator.dispose(&mut sim);
        assert_eq!(sim.head_event_time(root), None);
        generator.end(&mut sim);
        assert_eq!(
            generator.start(&mut sim),
            Err(Error::Disposed(generator.sandbox()))
        );
        assert!(!generator.is_on());
    }

    #[rstest]
    fn test_restart_after_reset(setup: Setup) {
        let Setup {
            mut sim,
            root,
            generator,
            arrivals,
        } = setup;
        generator.start(&mut sim).unwrap();
        sim.run_until(root, secs(25)).unwrap();
        assert_eq!(generator.count(), 2);
        sim.reset(root);
        assert!(!generator.is_on());
        assert_eq!(generator.count(), 0);
        assert_eq!(generator.start_time(), None);
        assert_eq!(sim.head_event_time(root), None);
        generator.start(&mut sim).unwrap();
        sim.run_until(root, secs(100)).unwrap();
        assert_eq!(generator.count(), 10);
        assert_eq!(sim.head_event_time(root), Some(secs(110)));
        assert_eq!(arrivals.borrow().len(), 12);
    }

    #[test]
    fn test_start_without_distribution() {
        let mut sim = Simulation::new();
        let generator =
            Generator::new(&mut sim, GeneratorConfig::default(), 0, Some("empty")).unwrap();
        assert!(matches!(
            generator.start(&mut sim),
            Err(Error::Configuration(_))
        ));
        assert!(!generator.is_on());
    }
}
