use std::time::Duration;

use crate::SandboxId;

/// Errors raised by the simulation kernel and the standard components.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A component was configured with invalid or missing values, e.g., a generator started
    /// without an inter-arrival time distribution.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An hour counter received an observation older than its last one.
    #[error("observation at {time:?} precedes the last observation at {last:?}")]
    OutOfOrderObservation {
        /// Time of the rejected observation.
        time: Duration,
        /// Time of the last accepted observation.
        last: Duration,
    },

    /// An action (or a run target) was requested at a time before the current clock.
    #[error("cannot schedule at {requested:?} when the clock is at {current:?}")]
    InvalidScheduleTime {
        /// Requested time.
        requested: Duration,
        /// Current clock time.
        current: Duration,
    },

    /// A delay would move the clock past the largest representable time.
    #[error("cannot advance the clock at {current:?} by {delay:?}")]
    TimeOverflow {
        /// Current clock time.
        current: Duration,
        /// Requested delay.
        delay: Duration,
    },

    /// A sandbox can be added as a child only once.
    #[error("sandbox {0} is already attached to a parent")]
    AlreadyAttached(SandboxId),

    /// Attaching the child would make the sandbox tree cyclic.
    #[error("attaching sandbox {child} to {parent} would create a cycle")]
    CyclicAttachment {
        /// The would-be parent.
        parent: SandboxId,
        /// The would-be child.
        child: SandboxId,
    },

    /// The sandbox has been disposed and no longer accepts actions.
    #[error("sandbox {0} has been disposed")]
    Disposed(SandboxId),

    /// Simulation time could not be mapped onto a calendar date.
    #[error("simulation time {0:?} is out of the calendar range")]
    TimeOutOfRange(Duration),
}

/// Result type returned by the kernel.
pub type Result<T> = std::result::Result<T, Error>;
