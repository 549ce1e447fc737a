use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// A unit of work flowing through the process network, e.g., a customer or a job.
///
/// Loads are minted by [`Simulation::new_load`](crate::Simulation::new_load), so their IDs are
/// unique within a simulation.
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
#[display(fmt = "Load#{}", _0)]
pub struct Load(usize);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Load::from(3).to_string(), "Load#3");
        assert_eq!(usize::from(Load::from(5)), 5);
    }
}
