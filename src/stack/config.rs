//! Stack descriptor configuration types

use crate::error::{Result, StackupError};
use crate::process::{PortMapping, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stack descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Descriptor schema version
    #[serde(default)]
    pub version: Option<String>,
    /// Project name
    #[serde(default)]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    /// Named volumes (implicit definitions allowed)
    #[serde(default)]
    pub volumes: HashMap<String, Option<VolumeConfig>>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            version: Some("3.8".to_string()),
            name: None,
            services: HashMap::new(),
            volumes: HashMap::new(),
        }
    }
}

/// Service definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image reference
    #[serde(default)]
    pub image: Option<String>,
    /// Build configuration
    #[serde(default)]
    pub build: Option<BuildSection>,
    /// Command to run
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Environment variables
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    /// Environment file
    #[serde(default)]
    pub env_file: Option<EnvFileConfig>,
    /// Port mappings ("host:container[/protocol]")
    #[serde(default)]
    pub ports: Option<Vec<String>>,
    /// Volume mounts ("source:target[:ro]")
    #[serde(default)]
    pub volumes: Option<Vec<String>>,
    /// Services that must be issued their start command first
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
}

/// Build section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSection {
    /// Simple context path
    Simple(String),
    /// Full build configuration
    Full(BuildSectionFull),
}

/// Full build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSectionFull {
    /// Build context
    pub context: Option<String>,
    /// Build file path, relative to the context
    pub dockerfile: Option<String>,
    /// Build arguments, fixed at image-build time
    #[serde(default)]
    pub args: Option<HashMap<String, String>>,
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

impl CommandConfig {
    /// Turn the command into an argv, wrapping shell form
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            CommandConfig::Shell(s) => vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                s.clone(),
            ],
            CommandConfig::Exec(argv) => argv.clone(),
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(HashMap<String, Option<String>>),
}

impl EnvironmentConfig {
    /// Flatten into a key/value map
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut result = HashMap::new();

        match self {
            EnvironmentConfig::Array(items) => {
                for item in items {
                    if let Some((key, value)) = item.split_once('=') {
                        result.insert(key.to_string(), value.to_string());
                    }
                }
            }
            EnvironmentConfig::Map(map) => {
                for (key, value) in map {
                    if let Some(v) = value {
                        result.insert(key.clone(), v.clone());
                    }
                }
            }
        }

        result
    }
}

/// Env file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFileConfig {
    /// Single file
    Single(String),
    /// Multiple files
    Multiple(Vec<String>),
}

impl EnvFileConfig {
    /// Referenced paths, in declaration order
    pub fn paths(&self) -> Vec<&str> {
        match self {
            EnvFileConfig::Single(path) => vec![path.as_str()],
            EnvFileConfig::Multiple(paths) => paths.iter().map(|p| p.as_str()).collect(),
        }
    }
}

/// Volume configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Explicit volume name
    pub name: Option<String>,
}

/// Source side of a volume mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Named volume
    Volume(String),
    /// Host path bind mount
    Bind(String),
}

/// Parsed short-syntax volume mount
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

/// Parse a "host:container[/protocol]" port mapping
pub fn parse_port_mapping(spec: &str) -> Result<PortMapping> {
    let (mapping, protocol) = match spec.split_once('/') {
        Some((mapping, "tcp")) => (mapping, Protocol::Tcp),
        Some((mapping, "udp")) => (mapping, Protocol::Udp),
        Some((_, other)) => {
            return Err(StackupError::InvalidConfig(format!(
                "Invalid protocol '{}' in port mapping '{}'",
                other, spec
            )))
        }
        None => (spec, Protocol::Tcp),
    };

    let (host, container) = mapping.split_once(':').ok_or_else(|| {
        StackupError::InvalidConfig(format!(
            "Port mapping '{}' must be host:container",
            spec
        ))
    })?;

    let host_port: u16 = host.parse().map_err(|_| {
        StackupError::InvalidConfig(format!("Invalid host port '{}' in '{}'", host, spec))
    })?;
    let container_port: u16 = container.parse().map_err(|_| {
        StackupError::InvalidConfig(format!(
            "Invalid container port '{}' in '{}'",
            container, spec
        ))
    })?;

    Ok(PortMapping {
        host_port,
        container_port,
        protocol,
    })
}

/// Parse a "source:target[:ro]" volume mount
///
/// A source that looks like a path is a bind mount; anything else names a
/// volume.
pub fn parse_mount(spec: &str) -> Result<MountSpec> {
    let parts: Vec<&str> = spec.split(':').collect();

    let (source, target, read_only) = match parts.as_slice() {
        [source, target] => (*source, *target, false),
        [source, target, mode] => (*source, *target, *mode == "ro"),
        _ => {
            return Err(StackupError::InvalidConfig(format!(
                "Volume mount '{}' must be source:target[:ro]",
                spec
            )))
        }
    };

    if !target.starts_with('/') {
        return Err(StackupError::InvalidConfig(format!(
            "Mount target '{}' must be an absolute path",
            target
        )));
    }

    let source = if source.starts_with('/')
        || source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with('~')
    {
        MountSource::Bind(source.to_string())
    } else {
        MountSource::Volume(source.to_string())
    };

    Ok(MountSpec {
        source,
        target: target.to_string(),
        read_only,
    })
}
