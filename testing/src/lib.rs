//! Deterministic distributions for testing simulation components.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::cell::Cell;

use rand::distributions::Distribution;

/// This distribution always produces the same value, never touching the random number generator.
///
/// Useful for deterministic inter-arrival or service times, where a test needs to compute the
/// exact times at which events occur.
#[derive(Debug, Clone, Copy)]
pub struct ConstantDistribution<T> {
    value: T,
}

impl<T> ConstantDistribution<T> {
    /// Constructs a distribution always returning `value`.
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Copy> Distribution<T> for ConstantDistribution<T> {
    fn sample<R: rand::Rng + ?Sized>(&self, _: &mut R) -> T {
        self.value
    }
}

/// Produces the given values one by one, wrapping around after reaching the end.
///
/// The random number generator is ignored, which makes sequences of samples predictable in unit
/// tests regardless of the seed.
#[derive(Debug)]
pub struct SequenceDistribution<T> {
    values: Vec<T>,
    position: Cell<usize>,
}

impl<T> SequenceDistribution<T> {
    /// Constructs a distribution cycling through `values`.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty.
    pub fn new(values: Vec<T>) -> Self {
        assert!(!values.is_empty(), "sequence must not be empty");
        Self {
            values,
            position: Cell::new(0),
        }
    }
}

impl<T: Copy> Distribution<T> for SequenceDistribution<T> {
    fn sample<R: rand::Rng + ?Sized>(&self, _: &mut R) -> T {
        let position = self.position.get();
        self.position.set((position + 1) % self.values.len());
        self.values[position]
    }
}
