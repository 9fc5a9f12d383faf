//! Testing infrastructure
//!
//! Recording fakes for the OS layer and every collaborator seam.

pub mod fakes;
