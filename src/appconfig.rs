//! Frontend runtime configuration descriptor
//!
//! A Next.js-style configuration object, read from `app.config.json` in a
//! service's build context. `env` entries without a literal value are
//! sourced at build time from the build environment and baked into the
//! image, so changing them later requires a rebuild.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Runtime configuration file name
pub const APP_CONFIG_FILE: &str = "app.config.json";

/// Application runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppRuntimeConfig {
    /// Enable additional development-time checks
    pub react_strict_mode: bool,
    /// Image optimization settings
    pub images: ImageOptimization,
    /// Variables exposed to client-bundled code
    pub env: HashMap<String, Option<String>>,
}

/// Image optimization settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptimization {
    /// Allow-list of external hostnames permitted for image optimization
    pub domains: Vec<String>,
}

impl AppRuntimeConfig {
    /// Load the configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolve the `env` mapping against the build environment
    ///
    /// Entries with a literal value keep it; entries without one take the
    /// variable of the same name from the build environment.
    pub fn resolve_env(&self, build_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut resolved = HashMap::new();

        for (key, value) in &self.env {
            match value.clone().or_else(|| build_env.get(key).cloned()) {
                Some(v) => {
                    resolved.insert(key.clone(), v);
                }
                None => {
                    tracing::warn!("Variable {} is not set in the build environment", key);
                }
            }
        }

        resolved
    }

    /// Check whether an external image host is allowed
    pub fn allows_image_host(&self, host: &str) -> bool {
        self.images.domains.iter().any(|d| d == host)
    }
}
