use std::fmt;
use std::rc::Rc;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::{Result, Simulation};

/// A callback notified with a value emitted by a component.
pub type Observer<T> = Rc<dyn Fn(&mut Simulation, &T) -> Result<()>>;

/// Subscription handle returned by [`Observers::subscribe`].
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
pub struct ObserverId(usize);

/// List of observers of a single notification point, notified in the order of subscription.
pub struct Observers<T> {
    next_id: usize,
    observers: Vec<(ObserverId, Observer<T>)>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            observers: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|(id, _)| id))
            .finish()
    }
}

impl<T> Observers<T> {
    /// Adds an observer to the end of the list.
    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: Fn(&mut Simulation, &T) -> Result<()> + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Rc::new(observer)));
        id
    }

    /// Removes the observer. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let len = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() < len
    }

    /// Removes all observers.
    pub fn clear(&mut self) {
        self.observers.clear();
    }

    /// Number of subscribed observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Checks if no observer is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Takes a snapshot of the current observers.
    ///
    /// Components take a snapshot while their state is borrowed, then release the borrow before
    /// notifying, so that observers are free to call back into the component.
    #[must_use]
    pub fn notifier(&self) -> Notifier<T> {
        Notifier(
            self.observers
                .iter()
                .map(|(_, observer)| Rc::clone(observer))
                .collect(),
        )
    }
}

/// Snapshot of observers created by [`Observers::notifier`].
pub struct Notifier<T>(Vec<Observer<T>>);

impl<T> Notifier<T> {
    /// Notifies every observer of the snapshot, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error returned by an observer.
    pub fn notify(&self, simulation: &mut Simulation, value: &T) -> Result<()> {
        self.0
            .iter()
            .try_for_each(|observer| observer(simulation, value))
    }
}
