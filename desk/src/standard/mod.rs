//! Standard process components built on the kernel: arrival generators, a queue, and a server.
//!
//! Components are cheap to clone handles to shared state. Each one owns a sandbox, which should
//! be attached to the model's tree with [`Simulation::add_child`], and exposes input operations
//! taking `&mut Simulation` together with notification points that other components or external
//! code subscribe to.

use std::time::Duration;

use crate::{Load, ObserverId, Result, SandboxId, Simulation};

mod generator;
pub use generator::{Generator, GeneratorConfig};

mod pattern_generator;
pub use pattern_generator::{CustomSeasonality, PatternGenerator, PatternGeneratorConfig};

mod queue;
pub use queue::Queue;

mod server;
pub use server::{Server, ServerConfig};

/// Common interface of arrival generators.
pub trait ArrivalProcess {
    /// The sandbox owned by the generator.
    fn sandbox(&self) -> SandboxId;

    /// Turns the generator on and schedules the first arrival. Does nothing if already on.
    ///
    /// # Errors
    ///
    /// Fails if the generator is misconfigured or its sandbox is disposed.
    fn start(&self, simulation: &mut Simulation) -> Result<()>;

    /// Turns the generator off. Arrivals already scheduled are suppressed.
    fn end(&self, simulation: &mut Simulation);

    /// Checks if the generator is on.
    fn is_on(&self) -> bool;

    /// Time of the last start, if ever started.
    fn start_time(&self) -> Option<Duration>;

    /// Number of arrivals since the last start or warm-up.
    fn count(&self) -> usize;

    /// Subscribes to arrivals.
    fn on_arrive<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&mut Simulation, &Load) -> Result<()> + 'static;
}

fn log_prefix(simulation: &Simulation, sandbox: SandboxId) -> String {
    format!(
        "[{:?}] {}",
        simulation.clock_time(sandbox),
        simulation.label(sandbox)
    )
}
