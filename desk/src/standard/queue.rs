use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::rc::Rc;

use super::log_prefix;
use crate::{CounterId, Error, ObserverId, Observers, Result, SandboxId, Simulation};

struct State<L> {
    capacity: f64,
    pending: VecDeque<L>,
    queueing: Vec<L>,
    counter: CounterId,
    on_enqueued: Observers<L>,
}

/// Capacity-bounded FIFO buffer.
///
/// Loads requesting to enqueue wait in a pending list until there is room in the queue, and are
/// admitted strictly in the order of their requests. Loads leave the queue on
/// [`Queue::dequeue`], in any order.
pub struct Queue<L> {
    sandbox: SandboxId,
    state: Rc<RefCell<State<L>>>,
}

impl<L> Clone for Queue<L> {
    fn clone(&self) -> Self {
        Self {
            sandbox: self.sandbox,
            state: Rc::clone(&self.state),
        }
    }
}

impl<L> Queue<L>
where
    L: Clone + PartialEq + Debug + 'static,
{
    /// Creates an empty queue holding at most `capacity` loads, which may be infinite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `capacity` is negative or NaN.
    pub fn new(
        simulation: &mut Simulation,
        capacity: f64,
        seed: u64,
        id: Option<&str>,
    ) -> Result<Self> {
        if capacity.is_nan() || capacity < 0.0 {
            return Err(Error::Configuration(format!(
                "queue capacity must be non-negative, got {}",
                capacity
            )));
        }
        let sandbox = simulation.create_sandbox(seed, Some(id.unwrap_or("Queue")));
        let counter = simulation.add_hour_counter(sandbox);
        let state = Rc::new(RefCell::new(State {
            capacity,
            pending: VecDeque::new(),
            queueing: Vec::new(),
            counter,
            on_enqueued: Observers::default(),
        }));
        let weak = Rc::downgrade(&state);
        simulation.add_reset_handler(sandbox, move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.borrow_mut();
                state.pending.clear();
                state.queueing.clear();
            }
        });
        Ok(Self { sandbox, state })
    }

    /// The sandbox owned by the queue.
    #[must_use]
    pub fn sandbox(&self) -> SandboxId {
        self.sandbox
    }

    /// Adds the load to the pending list and admits as many pending loads as there is room for.
    ///
    /// # Errors
    ///
    /// Returns the first error returned by an `on_enqueued` observer.
    pub fn request_enqueue(&self, simulation: &mut Simulation, load: L) -> Result<()> {
        log::debug!(
            "{} Request to enqueue {:?}",
            log_prefix(simulation, self.sandbox),
            load
        );
        self.state.borrow_mut().pending.push_back(load);
        self.attempt_to_enqueue(simulation)
    }

    /// Removes the load from the queue, and admits pending loads in its place.
    /// Returns `false` and does nothing if the load is not in the queue.
    ///
    /// # Errors
    ///
    /// Returns the first error returned by an `on_enqueued` observer.
    pub fn dequeue(&self, simulation: &mut Simulation, load: &L) -> Result<bool> {
        let counter = {
            let mut state = self.state.borrow_mut();
            match state.queueing.iter().position(|l| l == load) {
                Some(position) => {
                    state.queueing.remove(position);
                    state.counter
                }
                None => return Ok(false),
            }
        };
        log::debug!("{} Dequeue {:?}", log_prefix(simulation, self.sandbox), load);
        simulation.observe_change(counter, -1.0)?;
        self.attempt_to_enqueue(simulation)?;
        Ok(true)
    }

    fn attempt_to_enqueue(&self, simulation: &mut Simulation) -> Result<()> {
        loop {
            let (load, counter, notifier) = {
                let mut state = self.state.borrow_mut();
                if (state.queueing.len() as f64) >= state.capacity {
                    return Ok(());
                }
                let load = match state.pending.pop_front() {
                    Some(load) => load,
                    None => return Ok(()),
                };
                state.queueing.push(load.clone());
                (load, state.counter, state.on_enqueued.notifier())
            };
            log::debug!("{} Enqueue {:?}", log_prefix(simulation, self.sandbox), load);
            simulation.observe_change(counter, 1.0)?;
            notifier.notify(simulation, &load)?;
        }
    }

    /// Subscribes to loads entering the queue.
    pub fn on_enqueued<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&mut Simulation, &L) -> Result<()> + 'static,
    {
        self.state.borrow_mut().on_enqueued.subscribe(observer)
    }

    /// Removes an `on_enqueued` observer. Returns `false` if it was not subscribed.
    pub fn remove_on_enqueued(&self, id: ObserverId) -> bool {
        self.state.borrow_mut().on_enqueued.unsubscribe(id)
    }

    /// Maximum number of loads in the queue.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.state.borrow().capacity
    }

    /// Loads waiting to enter the queue, in the order of requests.
    #[must_use]
    pub fn pending_to_enqueue(&self) -> Vec<L> {
        self.state.borrow().pending.iter().cloned().collect()
    }

    /// Loads in the queue, in the order of admission.
    #[must_use]
    pub fn queueing(&self) -> Vec<L> {
        self.state.borrow().queueing.clone()
    }

    /// Number of loads in the queue.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.state.borrow().queueing.len()
    }

    /// Remaining room in the queue.
    #[must_use]
    pub fn vacancy(&self) -> f64 {
        let state = self.state.borrow();
        state.capacity - state.queueing.len() as f64
    }

    /// Time-average number of loads in the queue.
    #[must_use]
    pub fn avg_n_queueing(&self, simulation: &Simulation) -> f64 {
        simulation.average_count(self.state.borrow().counter)
    }

    /// Time-average fraction of the capacity in use.
    #[must_use]
    pub fn utilization(&self, simulation: &Simulation) -> f64 {
        self.avg_n_queueing(simulation) / self.capacity()
    }

    /// Disposes the sandbox and drops all observers.
    pub fn dispose(&self, simulation: &mut Simulation) {
        self.state.borrow_mut().on_enqueued.clear();
        simulation.dispose(self.sandbox);
    }
}
