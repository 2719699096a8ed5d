//! Network management module
//!
//! This module provides the per-project bridge network and
//! service-name-based addressing.

pub mod project;

pub use project::{AddressAllocator, Endpoint, ProjectNetwork};
