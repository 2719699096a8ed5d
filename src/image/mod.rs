//! Image management module
//!
//! This module provides functionality for building images from build
//! descriptors and storing them locally.

pub mod builder;
pub mod store;

pub use builder::{BuildContext, ImageBuilder};
pub use store::{Image, ImageConfig, ImageStore};
