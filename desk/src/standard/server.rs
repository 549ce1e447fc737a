use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::rc::Rc;

use super::log_prefix;
use crate::{CounterId, Error, LoadSampler, ObserverId, Observers, Result, SandboxId, Simulation};

/// Configuration of a [`Server`].
pub struct ServerConfig<L> {
    /// Maximum number of loads occupying the server, either served or waiting to depart.
    pub capacity: f64,
    /// Distribution of the service time of a load. Required.
    pub service_time: Option<LoadSampler<L>>,
}

impl<L> Clone for ServerConfig<L> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            service_time: self.service_time.clone(),
        }
    }
}

impl<L> Default for ServerConfig<L> {
    fn default() -> Self {
        Self {
            capacity: 1.0,
            service_time: None,
        }
    }
}

struct State<L> {
    capacity: f64,
    service_time: LoadSampler<L>,
    pending: VecDeque<L>,
    serving: Vec<L>,
    pending_to_depart: Vec<L>,
    serving_counter: CounterId,
    pending_to_depart_counter: CounterId,
    on_started: Observers<L>,
    on_ready_to_depart: Observers<L>,
}

impl<L> State<L> {
    fn occupancy(&self) -> usize {
        self.serving.len() + self.pending_to_depart.len()
    }
}

/// Capacity-bounded service station.
///
/// A started load is served for a sampled time, after which it becomes ready to depart. It keeps
/// occupying the server until [`Server::depart`] is called, which models blocking by downstream
/// components.
pub struct Server<L> {
    sandbox: SandboxId,
    state: Rc<RefCell<State<L>>>,
}

impl<L> Clone for Server<L> {
    fn clone(&self) -> Self {
        Self {
            sandbox: self.sandbox,
            state: Rc::clone(&self.state),
        }
    }
}

impl<L> Server<L>
where
    L: Clone + PartialEq + Debug + 'static,
{
    /// Creates an idle server owning a new sandbox seeded with `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the service time is missing or the capacity is
    /// negative or NaN.
    pub fn new(
        simulation: &mut Simulation,
        config: ServerConfig<L>,
        seed: u64,
        id: Option<&str>,
    ) -> Result<Self> {
        let capacity = config.capacity;
        if capacity.is_nan() || capacity < 0.0 {
            return Err(Error::Configuration(format!(
                "server capacity must be non-negative, got {}",
                capacity
            )));
        }
        let service_time = config
            .service_time
            .ok_or_else(|| Error::Configuration(String::from("server has no service time")))?;
        let sandbox = simulation.create_sandbox(seed, Some(id.unwrap_or("Server")));
        let serving_counter = simulation.add_hour_counter(sandbox);
        let pending_to_depart_counter = simulation.add_hour_counter(sandbox);
        let state = Rc::new(RefCell::new(State {
            capacity,
            service_time,
            pending: VecDeque::new(),
            serving: Vec::new(),
            pending_to_depart: Vec::new(),
            serving_counter,
            pending_to_depart_counter,
            on_started: Observers::default(),
            on_ready_to_depart: Observers::default(),
        }));
        let weak = Rc::downgrade(&state);
        simulation.add_reset_handler(sandbox, move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.borrow_mut();
                state.pending.clear();
                state.serving.clear();
                state.pending_to_depart.clear();
            }
        });
        Ok(Self { sandbox, state })
    }

    /// The sandbox owned by the server.
    #[must_use]
    pub fn sandbox(&self) -> SandboxId {
        self.sandbox
    }

    /// Adds the load to the pending list and starts serving as many pending loads as there is
    /// room for.
    ///
    /// # Errors
    ///
    /// Returns the first error returned by an `on_started` observer.
    pub fn request_start(&self, simulation: &mut Simulation, load: L) -> Result<()> {
        log::debug!(
            "{} Request to start {:?}",
            log_prefix(simulation, self.sandbox),
            load
        );
        self.state.borrow_mut().pending.push_back(load);
        self.attempt_to_start(simulation)
    }

    fn attempt_to_start(&self, simulation: &mut Simulation) -> Result<()> {
        loop {
            let (load, counter, service_time, notifier) = {
                let mut state = self.state.borrow_mut();
                if (state.occupancy() as f64) >= state.capacity {
                    return Ok(());
                }
                let load = match state.pending.pop_front() {
                    Some(load) => load,
                    None => return Ok(()),
                };
                state.serving.push(load.clone());
                (
                    load,
                    state.serving_counter,
                    Rc::clone(&state.service_time),
                    state.on_started.notifier(),
                )
            };
            log::debug!("{} Start {:?}", log_prefix(simulation, self.sandbox), load);
            simulation.observe_change(counter, 1.0)?;
            notifier.notify(simulation, &load)?;
            let duration = service_time(simulation.rng(self.sandbox), &load);
            let server = self.clone();
            simulation.schedule_after_tagged(
                self.sandbox,
                duration,
                "ready to depart",
                move |simulation| server.ready_to_depart(simulation, load),
            )?;
        }
    }

    fn ready_to_depart(&self, simulation: &mut Simulation, load: L) -> Result<()> {
        let (serving_counter, pending_to_depart_counter, notifier) = {
            let mut state = self.state.borrow_mut();
            match state.serving.iter().position(|l| *l == load) {
                Some(position) => {
                    state.serving.remove(position);
                }
                None => return Ok(()),
            }
            state.pending_to_depart.push(load.clone());
            (
                state.serving_counter,
                state.pending_to_depart_counter,
                state.on_ready_to_depart.notifier(),
            )
        };
        log::debug!(
            "{} Ready to depart {:?}",
            log_prefix(simulation, self.sandbox),
            load
        );
        simulation.observe_change(serving_counter, -1.0)?;
        simulation.observe_change(pending_to_depart_counter, 1.0)?;
        notifier.notify(simulation, &load)
    }

    /// Releases a load that is ready to depart, and starts serving pending loads in its place.
    /// Returns `false` and does nothing if the load is not ready to depart.
    ///
    /// # Errors
    ///
    /// Returns the first error returned by an `on_started` observer.
    pub fn depart(&self, simulation: &mut Simulation, load: &L) -> Result<bool> {
        let counter = {
            let mut state = self.state.borrow_mut();
            match state.pending_to_depart.iter().position(|l| l == load) {
                Some(position) => {
                    state.pending_to_depart.remove(position);
                    state.pending_to_depart_counter
                }
                None => return Ok(false),
            }
        };
        log::debug!("{} Depart {:?}", log_prefix(simulation, self.sandbox), load);
        simulation.observe_change(counter, -1.0)?;
        self.attempt_to_start(simulation)?;
        Ok(true)
    }

    /// Subscribes to loads starting service.
    pub fn on_started<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&mut Simulation, &L) -> Result<()> + 'static,
    {
        self.state.borrow_mut().on_started.subscribe(observer)
    }

    /// Removes an `on_started` observer. Returns `false` if it was not subscribed.
    pub fn remove_on_started(&self, id: ObserverId) -> bool {
        self.state.borrow_mut().on_started.unsubscribe(id)
    }

    /// Subscribes to loads finishing service.
    pub fn on_ready_to_depart<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&mut Simulation, &L) -> Result<()> + 'static,
    {
        self.state.borrow_mut().on_ready_to_depart.subscribe(observer)
    }

    /// Removes an `on_ready_to_depart` observer. Returns `false` if it was not subscribed.
    pub fn remove_on_ready_to_depart(&self, id: ObserverId) -> bool {
        self.state.borrow_mut().on_ready_to_depart.unsubscribe(id)
    }

    /// Maximum number of loads occupying the server.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.state.borrow().capacity
    }

    /// Loads waiting to start, in the order of requests.
    #[must_use]
    pub fn pending_to_start(&self) -> Vec<L> {
        self.state.borrow().pending.iter().cloned().collect()
    }

    /// Loads being served.
    #[must_use]
    pub fn serving(&self) -> Vec<L> {
        self.state.borrow().serving.clone()
    }

    /// Loads finished and waiting to depart.
    #[must_use]
    pub fn pending_to_depart(&self) -> Vec<L> {
        self.state.borrow().pending_to_depart.clone()
    }

    /// Number of loads being served or waiting to depart.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.state.borrow().occupancy()
    }

    /// Remaining capacity.
    #[must_use]
    pub fn vacancy(&self) -> f64 {
        let state = self.state.borrow();
        state.capacity - state.occupancy() as f64
    }

    /// Time-average number of loads being served.
    #[must_use]
    pub fn avg_n_serving(&self, simulation: &Simulation) -> f64 {
        simulation.average_count(self.state.borrow().serving_counter)
    }

    /// Time-average number of loads occupying the server.
    #[must_use]
    pub fn avg_n_occupying(&self, simulation: &Simulation) -> f64 {
        let state = self.state.borrow();
        simulation.average_count(state.serving_counter)
            + simulation.average_count(state.pending_to_depart_counter)
    }

    /// Time-average fraction of the capacity used for service.
    #[must_use]
    pub fn util_serving(&self, simulation: &Simulation) -> f64 {
        self.avg_n_serving(simulation) / self.capacity()
    }

    /// Time-average fraction of the capacity occupied.
    #[must_use]
    pub fn util_occupying(&self, simulation: &Simulation) -> f64 {
        self.avg_n_occupying(simulation) / self.capacity()
    }

    /// Disposes the sandbox and drops all observers.
    pub fn dispose(&self, simulation: &mut Simulation) {
        {
            let mut state = self.state.borrow_mut();
            state.on_started.clear();
            state.on_ready_to_depart.clear();
        }
        simulation.dispose(self.sandbox);
    }
}
