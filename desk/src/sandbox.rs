use std::time::{Duration, Instant};

use rand::SeedableRng;

use crate::event::{EventKey, FutureEventList, ScheduledAction};
use crate::{Action, CounterId, Error, EventId, HourCounter, Load, Result, SandboxId, SimRng};

type WarmUpHandler = Box<dyn FnMut(Duration)>;
type ResetHandler = Box<dyn FnMut()>;

/// A node of the sandbox tree.
///
/// The clock, the pacing timestamp, and the run flags are only meaningful at a root.
struct SandboxNode {
    id: Option<String>,
    seed: u64,
    rng: SimRng,
    parent: Option<SandboxId>,
    children: Vec<SandboxId>,
    events: FutureEventList,
    counters: Vec<CounterId>,
    warm_up_handlers: Vec<WarmUpHandler>,
    reset_handlers: Vec<ResetHandler>,
    clock: Duration,
    cancel_requested: bool,
    running: bool,
    last_real_time: Option<Instant>,
    disposed: bool,
}

impl SandboxNode {
    fn new(seed: u64, id: Option<&str>) -> Self {
        Self {
            id: id.map(String::from),
            seed,
            rng: SimRng::seed_from_u64(seed),
            parent: None,
            children: Vec::new(),
            events: FutureEventList::default(),
            counters: Vec::new(),
            warm_up_handlers: Vec::new(),
            reset_handlers: Vec::new(),
            clock: Duration::default(),
            cancel_requested: false,
            running: false,
            last_real_time: None,
            disposed: false,
        }
    }
}

struct CounterEntry {
    owner: SandboxId,
    counter: HourCounter,
}

/// The simulation run context: an arena of sandboxes forming one or more trees, together with
/// the hour counters registered on them and the sequences used to number sandboxes, events, and
/// loads.
///
/// Sandboxes are referenced by [`SandboxId`]. Any run or warm-up operation called with a
/// non-root sandbox is forwarded to its root, and every sandbox of a tree observes the root's
/// clock.
///
/// # Panics
///
/// Methods taking a [`SandboxId`] or [`CounterId`] panic if the ID was not created by this
/// simulation.
#[derive(Default)]
pub struct Simulation {
    sandboxes: Vec<SandboxNode>,
    counters: Vec<CounterEntry>,
    next_event_id: u64,
    next_load_id: usize,
}

impl Simulation {
    /// Constructs an empty simulation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, sandbox: SandboxId) -> &SandboxNode {
        &self.sandboxes[usize::from(sandbox)]
    }

    fn node_mut(&mut self, sandbox: SandboxId) -> &mut SandboxNode {
        &mut self.sandboxes[usize::from(sandbox)]
    }

    /// Creates a new root sandbox with its own random stream seeded with `seed`.
    pub fn create_sandbox(&mut self, seed: u64, id: Option<&str>) -> SandboxId {
        let sandbox = SandboxId(self.sandboxes.len());
        self.sandboxes.push(SandboxNode::new(seed, id));
        log::trace!("Created sandbox {}", self.label(sandbox));
        sandbox
    }

    /// Attaches `child` to `parent`. From now on, `child` observes the clock of the root of
    /// `parent`, and its actions fire as part of that tree.
    ///
    /// # Errors
    ///
    /// Fails if either sandbox is disposed, if `child` already has a parent, if `child` is an
    /// ancestor of `parent` (or `parent` itself), or if `child` holds actions scheduled before
    /// the clock of the tree it joins.
    pub fn add_child(&mut self, parent: SandboxId, child: SandboxId) -> Result<()> {
        for &sandbox in &[parent, child] {
            if self.node(sandbox).disposed {
                return Err(Error::Disposed(sandbox));
            }
        }
        if self.node(child).parent.is_some() {
            return Err(Error::AlreadyAttached(child));
        }
        if self.root(parent) == child {
            return Err(Error::CyclicAttachment { parent, child });
        }
        let current = self.clock_time(parent);
        if let Some(requested) = self.head_event_time(child) {
            if requested < current {
                return Err(Error::InvalidScheduleTime { requested, current });
            }
        }
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
        Ok(())
    }

    /// Returns the root of the tree containing `sandbox`.
    #[must_use]
    pub fn root(&self, sandbox: SandboxId) -> SandboxId {
        let mut current = sandbox;
        while let Some(parent) = self.node(current).parent {
            current = parent;
        }
        current
    }

    /// Returns the parent of `sandbox`, if attached.
    #[must_use]
    pub fn parent(&self, sandbox: SandboxId) -> Option<SandboxId> {
        self.node(sandbox).parent
    }

    /// Returns the children of `sandbox` in the order of attachment.
    #[must_use]
    pub fn children(&self, sandbox: SandboxId) -> &[SandboxId] {
        &self.node(sandbox).children
    }

    /// Sequence index of the sandbox.
    #[must_use]
    pub fn index(&self, sandbox: SandboxId) -> usize {
        usize::from(sandbox)
    }

    /// Optional human-readable ID of the sandbox.
    #[must_use]
    pub fn id(&self, sandbox: SandboxId) -> Option<&str> {
        self.node(sandbox).id.as_deref()
    }

    /// Seed of the random stream of the sandbox.
    #[must_use]
    pub fn seed(&self, sandbox: SandboxId) -> u64 {
        self.node(sandbox).seed
    }

    /// Label of the form `id#index`, used in logs.
    #[must_use]
    pub fn label(&self, sandbox: SandboxId) -> String {
        format!(
            "{}#{}",
            self.id(sandbox).unwrap_or("Sandbox"),
            self.index(sandbox)
        )
    }

    /// Checks if the sandbox has been disposed.
    #[must_use]
    pub fn is_disposed(&self, sandbox: SandboxId) -> bool {
        self.node(sandbox).disposed
    }

    /// The random stream of the sandbox.
    pub fn rng(&mut self, sandbox: SandboxId) -> &mut SimRng {
        &mut self.node_mut(sandbox).rng
    }

    /// Current time, as kept by the root of the tree containing `sandbox`.
    #[must_use]
    pub fn clock_time(&self, sandbox: SandboxId) -> Duration {
        self.node(self.root(sandbox)).clock
    }

    /// Checks if cancellation was requested for the tree containing `sandbox`.
    #[must_use]
    pub fn is_cancel_requested(&self, sandbox: SandboxId) -> bool {
        self.node(self.root(sandbox)).cancel_requested
    }

    /// Checks if a run loop is currently executing on the tree containing `sandbox`.
    #[must_use]
    pub fn is_simulation_running(&self, sandbox: SandboxId) -> bool {
        self.node(self.root(sandbox)).running
    }

    /// Number of actions pending in the local event list of `sandbox`, excluding its children.
    #[must_use]
    pub fn pending_events(&self, sandbox: SandboxId) -> usize {
        self.node(sandbox).events.len()
    }

    /// Returns the key and the owner of the earliest action in the subtree of `sandbox`.
    #[must_use]
    pub fn head_entry(&self, sandbox: SandboxId) -> Option<(EventKey, SandboxId)> {
        let node = self.node(sandbox);
        let local = node.events.peek_key().map(|key| (key, sandbox));
        node.children
            .iter()
            .filter_map(|&child| self.head_entry(child))
            .chain(local)
            .min_by_key(|(key, _)| *key)
    }

    /// Returns the earliest action in the subtree of `sandbox`.
    #[must_use]
    pub fn head_action(&self, sandbox: SandboxId) -> Option<&ScheduledAction> {
        self.head_entry(sandbox)
            .and_then(|(_, owner)| self.node(owner).events.peek())
    }

    /// Time of the earliest action in the subtree of `sandbox`, if any.
    #[must_use]
    pub fn head_event_time(&self, sandbox: SandboxId) -> Option<Duration> {
        self.head_entry(sandbox).map(|(key, _)| key.time())
    }

    fn insert(
        &mut self,
        sandbox: SandboxId,
        time: Duration,
        tag: Option<String>,
        action: Action,
    ) -> Result<EventId> {
        if self.node(sandbox).disposed {
            return Err(Error::Disposed(sandbox));
        }
        let current = self.clock_time(sandbox);
        if time < current {
            return Err(Error::InvalidScheduleTime {
                requested: time,
                current,
            });
        }
        let id = EventId::from(self.next_event_id);
        self.next_event_id += 1;
        let key = EventKey::new(time, id);
        self.node_mut(sandbox)
            .events
            .insert(ScheduledAction::new(key, sandbox, tag, action));
        Ok(id)
    }

    fn time_after(&self, sandbox: SandboxId, delay: Duration) -> Result<Duration> {
        let current = self.clock_time(sandbox);
        current
            .checked_add(delay)
            .ok_or(Error::TimeOverflow { current, delay })
    }

    /// Schedules `action` on `sandbox` at the absolute time `time`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScheduleTime`] if `time` is before the current clock, and
    /// [`Error::Disposed`] if the sandbox has been disposed.
    pub fn schedule<F>(&mut self, sandbox: SandboxId, time: Duration, action: F) -> Result<EventId>
    where
        F: FnOnce(&mut Simulation) -> Result<()> + 'static,
    {
        self.insert(sandbox, time, None, Box::new(action))
    }

    /// Schedules `action` on `sandbox` at the absolute time `time`, with a tag used in logs.
    ///
    /// # Errors
    ///
    /// See [`Simulation::schedule`].
    pub fn schedule_tagged<F, T>(
        &mut self,
        sandbox: SandboxId,
        time: Duration,
        tag: T,
        action: F,
    ) -> Result<EventId>
    where
        F: FnOnce(&mut Simulation) -> Result<()> + 'static,
        T: Into<String>,
    {
        self.insert(sandbox, time, Some(tag.into()), Box::new(action))
    }

    /// Schedules `action` on `sandbox` at `delay` after the current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the sandbox has been disposed, and [`Error::TimeOverflow`]
    /// if the delay moves past the largest representable time.
    pub fn schedule_after<F>(
        &mut self,
        sandbox: SandboxId,
        delay: Duration,
        action: F,
    ) -> Result<EventId>
    where
        F: FnOnce(&mut Simulation) -> Result<()> + 'static,
    {
        let time = self.time_after(sandbox, delay)?;
        self.insert(sandbox, time, None, Box::new(action))
    }

    /// Schedules `action` on `sandbox` at `delay` after the current time, with a tag used in logs.
    ///
    /// # Errors
    ///
    /// See [`Simulation::schedule_after`].
    pub fn schedule_after_tagged<F, T>(
        &mut self,
        sandbox: SandboxId,
        delay: Duration,
        tag: T,
        action: F,
    ) -> Result<EventId>
    where
        F: FnOnce(&mut Simulation) -> Result<()> + 'static,
        T: Into<String>,
    {
        let time = self.time_after(sandbox, delay)?;
        self.insert(sandbox, time, Some(tag.into()), Box::new(action))
    }

    /// Schedules `action` on `sandbox` at the current time. It fires after all the actions
    /// already scheduled for the current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the sandbox has been disposed.
    pub fn schedule_immediately<F>(&mut self, sandbox: SandboxId, action: F) -> Result<EventId>
    where
        F: FnOnce(&mut Simulation) -> Result<()> + 'static,
    {
        self.schedule_after(sandbox, Duration::default(), action)
    }

    fn step(&mut self, root: SandboxId) -> Result<bool> {
        let action = match self.head_entry(root) {
            Some((key, owner)) => self.node_mut(owner).events.remove(&key),
            None => None,
        };
        match action {
            Some(action) => {
                self.node_mut(root).clock = action.time();
                log::trace!(
                    "[{:?}] {} fires {}",
                    action.time(),
                    self.label(action.sandbox()),
                    action.tag().unwrap_or("action"),
                );
                action.fire(self)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn while_running<F>(&mut self, root: SandboxId, run: F) -> Result<bool>
    where
        F: FnOnce(&mut Self) -> Result<bool>,
    {
        let was_running = std::mem::replace(&mut self.node_mut(root).running, true);
        let result = run(self);
        self.node_mut(root).running = was_running;
        result
    }

    /// Fires the earliest action of the tree containing `sandbox`, advancing the clock to its
    /// time. Returns `false` if there was no action to fire.
    ///
    /// # Errors
    ///
    /// Returns the error of the fired action.
    pub fn run(&mut self, sandbox: SandboxId) -> Result<bool> {
        let root = self.root(sandbox);
        self.while_running(root, |sim| sim.step(root))
    }

    /// Fires all actions scheduled no later than `time`, then sets the clock to `time`.
    /// Returns whether any action remains scheduled, or `false` if the run was cancelled, in
    /// which case the clock stays at the last fired action.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScheduleTime`] if `time` is before the current clock, or the
    /// error of any fired action.
    pub fn run_until(&mut self, sandbox: SandboxId, time: Duration) -> Result<bool> {
        let root = self.root(sandbox);
        let current = self.clock_time(root);
        if time < current {
            return Err(Error::InvalidScheduleTime {
                requested: time,
                current,
            });
        }
        self.while_running(root, |sim| loop {
            if sim.node(root).cancel_requested {
                return Ok(false);
            }
            match sim.head_event_time(root) {
                Some(head) if head <= time => {
                    sim.step(root)?;
                }
                head => {
                    sim.node_mut(root).clock = time;
                    return Ok(head.is_some());
                }
            }
        })
    }

    /// Runs for `duration` from the current time. See [`Simulation::run_until`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeOverflow`] if the target time is not representable, or the error
    /// of any fired action.
    pub fn run_for(&mut self, sandbox: SandboxId, duration: Duration) -> Result<bool> {
        let time = self.time_after(sandbox, duration)?;
        self.run_until(sandbox, time)
    }

    /// Fires up to `count` actions. Returns `false` if the event list ran dry or the run was
    /// cancelled before firing all of them.
    ///
    /// # Errors
    ///
    /// Returns the error of any fired action.
    pub fn run_event_count(&mut self, sandbox: SandboxId, count: usize) -> Result<bool> {
        let root = self.root(sandbox);
        self.while_running(root, |sim| {
            for _ in 0..count {
                if sim.node(root).cancel_requested || !sim.step(root)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    /// Advances the simulation by the wall-clock time elapsed since the previous call,
    /// multiplied by `speed`. The first call only records the wall-clock timestamp.
    /// Returns whether any action remains scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `speed` is negative or not finite, or the error of
    /// any fired action.
    pub fn run_at_speed(&mut self, sandbox: SandboxId, speed: f64) -> Result<bool> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(Error::Configuration(format!(
                "run speed must be finite and non-negative, got {}",
                speed
            )));
        }
        let root = self.root(sandbox);
        let result = match self.node(root).last_real_time {
            Some(last) => {
                let elapsed = last.elapsed().as_secs_f64() * speed;
                let advance = Duration::try_from_secs_f64(elapsed)
                    .map_err(|err| Error::Configuration(err.to_string()))?;
                self.run_for(root, advance)
            }
            None => Ok(self.head_entry(root).is_some()),
        };
        self.node_mut(root).last_real_time = Some(Instant::now());
        result
    }

    /// Requests cancellation of the tree containing `sandbox`. Run loops check the flag before
    /// firing each action; an action already firing is not interrupted. The flag persists
    /// until [`Simulation::reset`].
    pub fn cancel(&mut self, sandbox: SandboxId) {
        let root = self.root(sandbox);
        log::info!("[{:?}] Cancel requested", self.clock_time(root));
        self.node_mut(root).cancel_requested = true;
    }

    fn subtree(&self, sandbox: SandboxId) -> Vec<SandboxId> {
        let mut ids = Vec::new();
        let mut stack = vec![sandbox];
        while let Some(current) = stack.pop() {
            ids.push(current);
            stack.extend(self.node(current).children.iter().rev());
        }
        ids
    }

    /// Runs until `time`, then resets the statistics of every hour counter in the tree and
    /// invokes the registered warm-up handlers. Scheduled actions and component state are kept.
    ///
    /// # Errors
    ///
    /// See [`Simulation::run_until`].
    pub fn warm_up_until(&mut self, sandbox: SandboxId, time: Duration) -> Result<bool> {
        let root = self.root(sandbox);
        let result = self.run_until(root, time)?;
        self.warmed_up(root);
        Ok(result)
    }

    /// Warms up for `period` from the current time. See [`Simulation::warm_up_until`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeOverflow`] if the target time is not representable, or the error
    /// of any fired action.
    pub fn warm_up_for(&mut self, sandbox: SandboxId, period: Duration) -> Result<bool> {
        let time = self.time_after(sandbox, period)?;
        self.warm_up_until(sandbox, time)
    }

    fn warmed_up(&mut self, root: SandboxId) {
        let now = self.clock_time(root);
        for sandbox in self.subtree(root) {
            let node = &mut self.sandboxes[usize::from(sandbox)];
            for &counter in &node.counters {
                self.counters[usize::from(counter)].counter.warmed_up(now);
            }
            for handler in &mut node.warm_up_handlers {
                handler(now);
            }
        }
        log::info!("[{:?}] Warmed up", now);
    }

    /// Registers a handler invoked with the clock time whenever the tree containing `sandbox`
    /// is warmed up.
    pub fn add_warm_up_handler<F>(&mut self, sandbox: SandboxId, handler: F)
    where
        F: FnMut(Duration) + 'static,
    {
        self.node_mut(sandbox)
            .warm_up_handlers
            .push(Box::new(handler));
    }

    /// Registers a handler invoked whenever the tree containing `sandbox` is reset, after its
    /// pending actions have been dropped. Components use it to return to their initial state.
    pub fn add_reset_handler<F>(&mut self, sandbox: SandboxId, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.node_mut(sandbox).reset_handlers.push(Box::new(handler));
    }

    /// Resets the whole tree containing `sandbox`: the clock goes back to zero, flags are
    /// cleared, every random stream is re-seeded, pending actions are dropped, and hour counters
    /// restart at zero. Registered reset handlers then bring components back to their initial
    /// state.
    pub fn reset(&mut self, sandbox: SandboxId) {
        let root = self.root(sandbox);
        {
            let node = self.node_mut(root);
            node.clock = Duration::default();
            node.cancel_requested = false;
            node.running = false;
            node.last_real_time = None;
        }
        for sandbox in self.subtree(root) {
            let node = &mut self.sandboxes[usize::from(sandbox)];
            node.rng = SimRng::seed_from_u64(node.seed);
            node.events.clear();
            for &counter in &node.counters {
                self.counters[usize::from(counter)]
                    .counter
                    .reset(Duration::default());
            }
            for handler in &mut node.reset_handlers {
                handler();
            }
        }
        log::info!("Reset {}", self.label(root));
    }

    /// Disposes `sandbox` and all its descendants: pending actions and handlers are dropped, and
    /// `sandbox` is detached from its parent. Disposed sandboxes reject new actions, and their
    /// hour counters reject new observations.
    pub fn dispose(&mut self, sandbox: SandboxId) {
        if let Some(parent) = self.node_mut(sandbox).parent.take() {
            self.node_mut(parent).children.retain(|&child| child != sandbox);
        }
        for id in self.subtree(sandbox) {
            let node = self.node_mut(id);
            node.events.clear();
            node.warm_up_handlers.clear();
            node.reset_handlers.clear();
            node.disposed = true;
        }
        log::debug!("Disposed {}", self.label(sandbox));
    }

    /// Registers a new hour counter on `sandbox`, starting at the current time. The counter is
    /// reset on warm-up of the tree.
    pub fn add_hour_counter(&mut self, sandbox: SandboxId) -> CounterId {
        let counter = HourCounter::new(self.clock_time(sandbox));
        self.register_counter(sandbox, counter)
    }

    /// Registers a new hour counter keeping up to `capacity` most recent observations.
    pub fn add_hour_counter_with_history(
        &mut self,
        sandbox: SandboxId,
        capacity: usize,
    ) -> CounterId {
        let counter = HourCounter::with_history(self.clock_time(sandbox), capacity);
        self.register_counter(sandbox, counter)
    }

    fn register_counter(&mut self, owner: SandboxId, counter: HourCounter) -> CounterId {
        let id = CounterId(self.counters.len());
        self.counters.push(CounterEntry { owner, counter });
        self.node_mut(owner).counters.push(id);
        id
    }

    /// Read-only access to a registered hour counter.
    #[must_use]
    pub fn hour_counter(&self, counter: CounterId) -> &HourCounter {
        &self.counters[usize::from(counter)].counter
    }

    fn counter_with_time(
        &mut self,
        counter: CounterId,
    ) -> Result<(&mut HourCounter, Duration)> {
        let owner = self.counters[usize::from(counter)].owner;
        if self.node(owner).disposed {
            return Err(Error::Disposed(owner));
        }
        let now = self.clock_time(owner);
        Ok((&mut self.counters[usize::from(counter)].counter, now))
    }

    /// Observes the change of the count by `delta` at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the sandbox owning the counter has been disposed, and
    /// [`Error::OutOfOrderObservation`] if the counter has observed a later time, which can only
    /// happen after [`Simulation::reset`] of a tree whose counters were registered elsewhere.
    pub fn observe_change(&mut self, counter: CounterId, delta: f64) -> Result<()> {
        let (counter, now) = self.counter_with_time(counter)?;
        counter.observe_change(delta, now)
    }

    /// Observes the count at the current time.
    ///
    /// # Errors
    ///
    /// See [`Simulation::observe_change`].
    pub fn observe_count(&mut self, counter: CounterId, count: f64) -> Result<()> {
        let (counter, now) = self.counter_with_time(counter)?;
        counter.observe_count(count, now)
    }

    /// Pauses the counter at the current time.
    ///
    /// # Errors
    ///
    /// See [`Simulation::observe_change`].
    pub fn pause_hour_counter(&mut self, counter: CounterId) -> Result<()> {
        let (counter, now) = self.counter_with_time(counter)?;
        counter.pause_at(now)
    }

    /// Resumes the counter at the current time.
    ///
    /// # Errors
    ///
    /// See [`Simulation::observe_change`].
    pub fn resume_hour_counter(&mut self, counter: CounterId) -> Result<()> {
        let (counter, now) = self.counter_with_time(counter)?;
        counter.resume(now)
    }

    /// Average count of the counter until the current time.
    #[must_use]
    pub fn average_count(&self, counter: CounterId) -> f64 {
        let entry = &self.counters[usize::from(counter)];
        entry
            .counter
            .average_count_at(self.clock_time(entry.owner))
    }

    /// Mints a new load.
    pub fn new_load(&mut self) -> Load {
        let load = Load::from(self.next_load_id);
        self.next_load_id += 1;
        load
    }
}
