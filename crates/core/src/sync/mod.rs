//! Sync domain models and state machines.

mod offline_earnings;
mod save_machine;
mod snapshot_model;
mod sync_scheduler;

pub use offline_earnings::*;
pub use save_machine::*;
pub use snapshot_model::*;
pub use sync_scheduler::*;
