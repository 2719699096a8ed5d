//! Storage management module
//!
//! This module provides named persistent volumes whose lifecycle is
//! independent of any single service process.

pub mod volume;

pub use volume::{Volume, VolumeManager};
