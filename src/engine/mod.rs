//! Monitoring engine: evaluation, notification and the run coordinator.

mod coordinator;
mod evaluator;
mod notifier;

pub use coordinator::*;
pub use evaluator::*;
pub use notifier::*;
