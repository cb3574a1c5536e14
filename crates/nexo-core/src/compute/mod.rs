//! Reactive recomputation of derived fields.
//!
//! The [`DependencyGraph`] is built once with the registry. Each unit of
//! work carries a [`RecomputeQueue`] of stale stored fields and a
//! [`PendingWrites`] buffer of computed values not yet flushed; the
//! propagation and drain logic lives on [`Environment`](crate::orm::Environment).

mod engine;
pub mod graph;
pub mod queue;

pub use graph::{DependencyGraph, Trigger, TriggerPath};
pub use queue::{PendingWrites, RecomputeQueue, RecomputeState, WriteGroup};
