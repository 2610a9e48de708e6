//! the copy run: destination planning and the per-entry engine

mod copy;
mod prepare;

pub use copy::{CopyEngine, CopyOptions, RunSummary};
pub use prepare::{plan_destination, Placement};
