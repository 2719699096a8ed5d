//! Service process management module
//!
//! This module provides core functionality for managing service processes,
//! including creation, lifecycle management, and host port ownership.

pub mod config;
pub mod lifecycle;
pub mod runtime;

pub use config::{MountPoint, PortMapping, ProcessConfig, ProcessStatus, Protocol};
pub use lifecycle::ProcessManager;
pub use runtime::ServiceProcess;
