//! Execution control
//!
//! Everything that runs in the forked child between fork and exec.

pub mod argv;
pub mod launcher;
pub mod preexec;
