//! Quiz parameters, question-type dispatch and the distribution calculator.

pub mod distribution;
pub mod types;

pub use distribution::{distribute, Distribution, DistributionError, DifficultyCount, TypeCount};
pub use types::*;
