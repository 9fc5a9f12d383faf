//! fuzzvisor: launch and supervision core of a feedback-driven fuzzer worker
//!
//! One iteration forks, prepares the child through a fixed pre-exec chain,
//! execs the target under ptrace and reaps it until the run is classified.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::sys`]: OS calls the child makes before exec
//! - [`kernel::stdio`]: stdio redirection and restore
//! - [`kernel::ptrace`]: tracer attach and stop classification
//! - [`kernel::perf`]: perf_event_open counters used as coverage feedback
//!
//! ## Execution Control ([`exec`])
//! - [`exec::preexec`]: type-state enforced pre-exec ordering
//! - [`exec::argv`]: command template expansion
//! - [`exec::launcher`]: the composed launch sequence
//!
//! ## Supervision ([`core`])
//! - [`core::types`]: run result model and collaborator traits
//! - [`core::supervisor`]: reap loop with the one-shot perf latch
//! - [`core::arch`]: per-worker initialization
//! - [`core::worker`]: fork, launch, supervise
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: run configuration and the crate error type
//! - [`config::validator`]: startup validation

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Supervision
pub mod core;

// Configuration
pub mod config;

// Testing Infrastructure
#[cfg(test)]
mod testing;

// CLI entrypoint wiring for the fuzzvisor binary.
pub mod cli;

pub use config::types::{FuzzError, Result, RunConfig};
pub use crate::core::arch::arch_init;
pub use crate::core::supervisor::supervise;
pub use crate::core::types::{Disposition, Outcome, RunResult};
pub use crate::core::worker::run_candidate;
pub use exec::launcher::launch;
