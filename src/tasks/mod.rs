//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Prune: Removes persisted entries older than the configured maximum age

mod prune;

pub use prune::spawn_prune_task;
