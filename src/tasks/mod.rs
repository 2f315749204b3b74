//! Background Tasks Module
//!
//! Tasks that run for the lifetime of a cache instance.
//!
//! # Tasks
//! - Sweep: removes expired entries and evicts when over the size budget
//! - Persistent writer: applies queued persistent-tier writes in order

mod gc;
mod writer;

pub use gc::{run_sweep, spawn_gc_task, SweepReport};
pub use writer::{spawn_persistent_writer, PersistOp, WriteQueue};
