//! Discrete-event simulation kernel.
//!
//! A [`Simulation`] owns a tree of sandboxes. Each sandbox keeps its own future event list and
//! random stream, while the clock is kept by the root of the tree only. Running a simulation
//! repeatedly fires the earliest scheduled action across the whole tree, in `(time, insertion)`
//! order, so that a fixed seed always reproduces the same results.
//!
//! On top of the kernel, [`standard`] provides the reference process components: arrival
//! generators, a capacity-bounded queue, and a capacity-bounded server.
//!
//! # Examples
//!
//! ```
//! # use desk::Simulation;
//! # use std::cell::Cell;
//! # use std::rc::Rc;
//! # use std::time::Duration;
//! # fn main() -> desk::Result<()> {
//! let mut sim = Simulation::new();
//! let root = sim.create_sandbox(0, Some("root"));
//! let fired = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&fired);
//! sim.schedule_after(root, Duration::from_secs(5), move |_| {
//!     counter.set(counter.get() + 1);
//!     Ok(())
//! })?;
//! assert!(!sim.run_until(root, Duration::from_secs(10))?);
//! assert_eq!(fired.get(), 1);
//! assert_eq!(sim.clock_time(root), Duration::from_secs(10));
//! # Ok(())
//! # }
//! ```

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
    clippy::cast_precision_loss
)]

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

mod error;
pub use error::{Error, Result};

mod event;
pub use event::{Action, EventId, EventKey, FutureEventList, ScheduledAction};

mod hour_counter;
pub use hour_counter::HourCounter;

mod sandbox;
pub use sandbox::Simulation;

mod observers;
pub use observers::{Notifier, Observer, ObserverId, Observers};

pub mod distribution;
pub use distribution::{LoadSampler, Sampler, SimRng, TimeUnit};

mod load;
pub use load::Load;

pub mod standard;

/// Sandbox ID, also its sequence index within the simulation.
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
pub struct SandboxId(usize);

/// Hour counter ID.
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
pub struct CounterId(usize);
