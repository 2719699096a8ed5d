//! Service process configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Process status, as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Process is created but not started
    Created,
    /// Start command has been issued
    Starting,
    /// Process is running
    Running,
    /// Process has been stopped
    Stopped,
    /// Process failed to start
    Failed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Created => write!(f, "created"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Service process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Unique process ID
    pub id: String,
    /// Process name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Command to run
    pub cmd: Vec<String>,
    /// Entry point
    pub entrypoint: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: String,
    /// Hostname (service-name addressing)
    pub hostname: String,
    /// Published ports
    pub ports: Vec<PortMapping>,
    /// Volume mounts
    pub mounts: Vec<MountPoint>,
    /// Current status
    pub status: ProcessStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Stop time
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code
    pub exit_code: Option<i32>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string().replace("-", "")[..12].to_string(),
            name: String::new(),
            image: String::new(),
            cmd: Vec::new(),
            entrypoint: Vec::new(),
            env: HashMap::new(),
            working_dir: "/".to_string(),
            hostname: String::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            status: ProcessStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }
}

impl ProcessConfig {
    /// Create a new process configuration
    pub fn new(name: &str, image: &str) -> Self {
        let mut config = Self::default();
        config.name = name.to_string();
        config.image = image.to_string();
        config.hostname = name.to_string();
        config
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: &str) -> Self {
        self.working_dir = dir.to_string();
        self
    }

    /// Add port mapping
    pub fn port(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortMapping {
            host_port,
            container_port,
            protocol: Protocol::Tcp,
        });
        self
    }

    /// Add volume mount
    pub fn mount(mut self, host_path: PathBuf, container_path: &str) -> Self {
        self.mounts.push(MountPoint {
            host_path,
            container_path: container_path.to_string(),
            read_only: false,
        });
        self
    }
}

/// Port mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// Network protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Volume mount point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountPoint {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}
