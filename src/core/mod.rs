//! Supervision core.
//!
//! Owns the per-run data model, the collaborator seams, the reap loop and
//! the fork/launch/supervise iteration built from them.

pub mod arch;
pub mod supervisor;
pub mod types;
pub mod worker;
