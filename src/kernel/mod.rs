//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here.

pub mod perf;
pub mod ptrace;
pub mod stdio;
pub mod sys;
