use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::{Result, SandboxId, Simulation};

/// A continuation invoked when its scheduled action fires.
pub type Action = Box<dyn FnOnce(&mut Simulation) -> Result<()>>;

/// Insertion sequence number of a scheduled action, unique within a [`Simulation`].
///
/// Event IDs are strictly increasing, and therefore break ties between actions scheduled at the
/// same time: the action scheduled first fires first.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct EventId(u64);

/// Sort key of a scheduled action: time first, then insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    time: Duration,
    id: EventId,
}

impl EventKey {
    pub(crate) fn new(time: Duration, id: EventId) -> Self {
        Self { time, id }
    }

    /// Scheduled time.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Insertion sequence number.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }
}

/// An action scheduled on a sandbox: owner, time, optional tag, and the continuation itself.
///
/// It is consumed exactly once: removed from its future event list at the moment it fires.
pub struct ScheduledAction {
    key: EventKey,
    sandbox: SandboxId,
    tag: Option<String>,
    action: Action,
}

impl ScheduledAction {
    pub(crate) fn new(key: EventKey, sandbox: SandboxId, tag: Option<String>, action: Action) -> Self {
        Self {
            key,
            sandbox,
            tag,
            action,
        }
    }

    /// Sort key of the action.
    #[must_use]
    pub fn key(&self) -> EventKey {
        self.key
    }

    /// The time at which the action fires.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.key.time
    }

    /// The ID of the action.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.key.id
    }

    /// The sandbox owning the action.
    #[must_use]
    pub fn sandbox(&self) -> SandboxId {
        self.sandbox
    }

    /// Optional tag given at scheduling.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub(crate) fn fire(self, simulation: &mut Simulation) -> Result<()> {
        (self.action)(simulation)
    }
}

impl fmt::Debug for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledAction")
            .field("time", &self.key.time)
            .field("id", &self.key.id)
            .field("sandbox", &self.sandbox)
            .field("tag", &self.tag)
            .finish()
    }
}

/// Ordered set of the actions scheduled on a single sandbox.
///
/// The earliest action is always the one with the smallest `(time, id)` key.
#[derive(Debug, Default)]
pub struct FutureEventList {
    actions: BTreeMap<EventKey, ScheduledAction>,
}

impl FutureEventList {
    /// Inserts an action.
    pub fn insert(&mut self, action: ScheduledAction) {
        self.actions.insert(action.key, action);
    }

    /// Returns the earliest action without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&ScheduledAction> {
        self.actions.values().next()
    }

    /// Returns the key of the earliest action.
    #[must_use]
    pub fn peek_key(&self) -> Option<EventKey> {
        self.actions.keys().next().copied()
    }

    /// Removes the action with the given key and returns it, if present.
    pub fn remove(&mut self, key: &EventKey) -> Option<ScheduledAction> {
        self.actions.remove(key)
    }

    /// Number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Checks if there are no pending actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drops all pending actions.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Iterates over pending actions in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &ScheduledAction> {
        self.actions.values()
    }
}
