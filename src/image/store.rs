//! Image store - manages locally built images

use crate::error::{Result, StackupError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Built image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Image ID
    pub id: String,
    /// Repository tags (e.g., ["demo-frontend:latest"])
    pub repo_tags: Vec<String>,
    /// Created timestamp
    pub created: DateTime<Utc>,
    /// Image configuration
    pub config: ImageConfig,
    /// Build arguments the image was built with, fully resolved
    ///
    /// These values are fixed at build time; changing them has no effect
    /// until the image is rebuilt.
    pub build_args: HashMap<String, String>,
    /// Number of build stages
    pub stage_count: usize,
}

/// Image configuration baked at build time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Environment variables baked into the image
    pub env: HashMap<String, String>,
    /// Default command
    pub cmd: Vec<String>,
    /// Entrypoint
    pub entrypoint: Vec<String>,
    /// Exposed ports ("3000/tcp")
    pub exposed_ports: Vec<String>,
    /// Working directory
    pub working_dir: String,
}

/// Image store for locally built images
pub struct ImageStore {
    /// Images indexed by ID
    images: Arc<RwLock<HashMap<String, Image>>>,
    /// Tag to ID mapping
    tags: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for ImageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStore {
    /// Create a new image store
    pub fn new() -> Self {
        Self {
            images: Arc::new(RwLock::new(HashMap::new())),
            tags: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a built image, pointing its tags at it
    ///
    /// A tag that already points at an older image is moved; the older
    /// image remains addressable by ID.
    pub fn insert(&self, image: Image) -> Result<()> {
        let mut images = self
            .images
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        if images.contains_key(&image.id) {
            return Err(StackupError::Image(format!(
                "Image {} already exists",
                image.id
            )));
        }

        let mut tags = self
            .tags
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        for tag in &image.repo_tags {
            tags.insert(tag.clone(), image.id.clone());
        }

        images.insert(image.id.clone(), image);

        Ok(())
    }

    /// Resolve a tag to an image ID
    pub fn resolve(&self, tag: &str) -> Option<String> {
        self.tags.read().ok()?.get(tag).cloned()
    }

    /// Get an image by ID
    pub fn get(&self, id: &str) -> Result<Image> {
        let images = self
            .images
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        images
            .get(id)
            .cloned()
            .ok_or_else(|| StackupError::ImageNotFound(id.to_string()))
    }

    /// Get an image by tag
    pub fn get_by_tag(&self, tag: &str) -> Option<Image> {
        let id = self.resolve(tag)?;
        self.get(&id).ok()
    }

    /// List all images
    pub fn list(&self) -> Result<Vec<Image>> {
        let images = self
            .images
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(images.values().cloned().collect())
    }

    /// Remove an image by ID or tag
    pub fn remove(&self, reference: &str) -> Result<()> {
        let id = self.resolve(reference).unwrap_or_else(|| reference.to_string());

        let mut images = self
            .images
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        images
            .remove(&id)
            .ok_or_else(|| StackupError::ImageNotFound(reference.to_string()))?;

        let mut tags = self
            .tags
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        tags.retain(|_, v| *v != id);

        Ok(())
    }
}
