//! Stack descriptor parser

use super::config::{parse_mount, parse_port_mapping, MountSource, StackConfig};
use crate::error::{Result, StackupError};
use std::collections::HashMap;
use std::path::Path;

/// Default descriptor file names
pub const DEFAULT_STACK_FILES: &[&str] = &[
    "stackup.yaml",
    "stackup.yml",
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Stack descriptor parser
pub struct StackParser;

impl StackParser {
    /// Find a descriptor file in a directory
    pub fn find_stack_file(dir: &Path) -> Option<std::path::PathBuf> {
        for name in DEFAULT_STACK_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Parse a descriptor from a path
    pub fn parse_file(path: &Path) -> Result<StackConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StackupError::DescriptorParse(format!("Failed to read file: {}", e)))?;

        Self::parse_str(&content)
    }

    /// Parse a descriptor from a string
    pub fn parse_str(content: &str) -> Result<StackConfig> {
        serde_yaml::from_str(content)
            .map_err(|e| StackupError::DescriptorParse(format!("Failed to parse YAML: {}", e)))
    }

    /// Validate a stack configuration
    ///
    /// Hard errors reject the stack before any process starts; the
    /// returned strings are non-fatal warnings.
    pub fn validate(config: &StackConfig) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        let mut host_ports: HashMap<u16, String> = HashMap::new();
        let mut volume_users: HashMap<String, String> = HashMap::new();

        for (name, service) in &config.services {
            // Service must have either image or build
            if service.image.is_none() && service.build.is_none() {
                return Err(StackupError::DescriptorParse(format!(
                    "Service '{}' must have either 'image' or 'build' specified",
                    name
                )));
            }

            // Validate depends_on references
            if let Some(deps) = &service.depends_on {
                for dep in deps {
                    if !config.services.contains_key(dep) {
                        return Err(StackupError::DescriptorParse(format!(
                            "Service '{}' depends on unknown service '{}'",
                            name, dep
                        )));
                    }
                }
            }

            // Host ports must be unique across the whole stack
            if let Some(ports) = &service.ports {
                for spec in ports {
                    let mapping = parse_port_mapping(spec)?;
                    if let Some(other) = host_ports.insert(mapping.host_port, name.clone()) {
                        return Err(StackupError::DescriptorParse(format!(
                            "Services '{}' and '{}' both publish host port {}",
                            other, name, mapping.host_port
                        )));
                    }
                }
            }

            // A named volume is mounted by at most one service
            if let Some(mounts) = &service.volumes {
                for spec in mounts {
                    let mount = parse_mount(spec)?;
                    if let MountSource::Volume(volume) = &mount.source {
                        if !config.volumes.contains_key(volume) {
                            warnings.push(format!(
                                "Service '{}' references undefined volume '{}' (will be created)",
                                name, volume
                            ));
                        }
                        if let Some(other) = volume_users.insert(volume.clone(), name.clone()) {
                            return Err(StackupError::DescriptorParse(format!(
                                "Volume '{}' is mounted by both '{}' and '{}'",
                                volume, other, name
                            )));
                        }
                    }
                }
            }
        }

        Ok(warnings)
    }

    /// Interpolate environment variables in a configuration
    pub fn interpolate(config: &mut StackConfig, env: &HashMap<String, String>) {
        for service in config.services.values_mut() {
            if let Some(ref mut image) = service.image {
                *image = interpolate_string(image, env);
            }

            if let Some(ref mut environment) = service.environment {
                match environment {
                    super::config::EnvironmentConfig::Map(map) => {
                        for value in map.values_mut() {
                            if let Some(v) = value {
                                *v = interpolate_string(v, env);
                            }
                        }
                    }
                    super::config::EnvironmentConfig::Array(items) => {
                        for item in items.iter_mut() {
                            *item = interpolate_string(item, env);
                        }
                    }
                }
            }

            // Build arguments are resolved against the host environment too
            if let Some(super::config::BuildSection::Full(ref mut full)) = service.build {
                if let Some(ref mut args) = full.args {
                    for value in args.values_mut() {
                        *value = interpolate_string(value, env);
                    }
                }
            }
        }
    }
}

/// Interpolate environment variables in a string
fn interpolate_string(s: &str, env: &HashMap<String, String>) -> String {
    let mut result = s.to_string();

    // Handle ${VAR} and $VAR syntax
    for (key, value) in env {
        result = result.replace(&format!("${{{}}}", key), value);
        result = result.replace(&format!("${}", key), value);
    }

    // Handle ${VAR:-default} syntax
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*):-([^}]*)\}").unwrap();
    result = re
        .replace_all(&result, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = &caps[2];
            env.get(var).cloned().unwrap_or_else(|| default.to_string())
        })
        .to_string();

    result
}
