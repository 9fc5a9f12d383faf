//! Configuration
//!
//! Run configuration shared read-only by every run, the crate error type,
//! and startup validation.

pub mod types;
pub mod validator;
