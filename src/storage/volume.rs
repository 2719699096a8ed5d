//! Volume management

use crate::error::{Result, StackupError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Named persistent volume
///
/// Created once, survives service recreation, destroyed only by explicit
/// operator action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Mount point on the host
    pub mountpoint: PathBuf,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// Create a new volume record
    pub fn new(name: &str, base_path: &Path) -> Self {
        Self {
            name: name.to_string(),
            mountpoint: base_path.join(name),
            created_at: Utc::now(),
        }
    }

    /// Get size in bytes
    pub fn size(&self) -> Result<u64> {
        if !self.mountpoint.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(&self.mountpoint)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }

        Ok(total)
    }
}

/// Volume manager
pub struct VolumeManager {
    /// Volumes indexed by name
    volumes: Arc<RwLock<HashMap<String, Volume>>>,
    /// Base path for volume storage
    base_path: PathBuf,
}

impl VolumeManager {
    /// Create a new volume manager
    ///
    /// Volume directories already present under the base path are
    /// re-registered, so data survives tool restarts.
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;

        let mut volumes = HashMap::new();
        for entry in std::fs::read_dir(&base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    volumes.insert(name.to_string(), Volume::new(name, &base_path));
                }
            }
        }

        Ok(Self {
            volumes: Arc::new(RwLock::new(volumes)),
            base_path,
        })
    }

    /// Create a new volume
    pub fn create(&self, name: &str) -> Result<Volume> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        if volumes.contains_key(name) {
            return Err(StackupError::Volume(format!(
                "Volume {} already exists",
                name
            )));
        }

        let volume = Volume::new(name, &self.base_path);
        std::fs::create_dir_all(&volume.mountpoint)?;
        volumes.insert(name.to_string(), volume.clone());

        Ok(volume)
    }

    /// Get an existing volume or create it
    ///
    /// Existing contents are preserved; this is the `up()` path, where a
    /// declared volume must survive service recreation.
    pub fn ensure(&self, name: &str) -> Result<Volume> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        if let Some(volume) = volumes.get(name) {
            return Ok(volume.clone());
        }

        let volume = Volume::new(name, &self.base_path);
        std::fs::create_dir_all(&volume.mountpoint)?;
        volumes.insert(name.to_string(), volume.clone());

        Ok(volume)
    }

    /// Get a volume by name
    pub fn get(&self, name: &str) -> Result<Volume> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        volumes
            .get(name)
            .cloned()
            .ok_or_else(|| StackupError::VolumeNotFound(name.to_string()))
    }

    /// List all volumes
    pub fn list(&self) -> Result<Vec<Volume>> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(volumes.values().cloned().collect())
    }

    /// Remove a volume and its contents
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        let volume = volumes
            .get(name)
            .ok_or_else(|| StackupError::VolumeNotFound(name.to_string()))?;

        if volume.mountpoint.exists() {
            std::fs::remove_dir_all(&volume.mountpoint)?;
        }

        volumes.remove(name);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_volume() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.create("db-data").unwrap();
        assert_eq!(volume.name, "db-data");
        assert!(volume.mountpoint.exists());
    }

    #[test]
    fn test_ensure_preserves_contents() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.ensure("db-data").unwrap();
        std::fs::write(volume.mountpoint.join("base.sql"), "create table t;").unwrap();

        let again = manager.ensure("db-data").unwrap();
        assert!(again.mountpoint.join("base.sql").exists());
    }

    #[test]
    fn test_remove_volume_deletes_contents() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.create("db-data").unwrap();
        std::fs::write(volume.mountpoint.join("base.sql"), "create table t;").unwrap();

        manager.remove("db-data").unwrap();
        assert!(manager.get("db-data").is_err());
        assert!(!volume.mountpoint.exists());
    }

    #[test]
    fn test_existing_directories_reregistered() {
        let temp = tempdir().unwrap();
        {
            let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
            let volume = manager.create("db-data").unwrap();
            std::fs::write(volume.mountpoint.join("base.sql"), "create table t;").unwrap();
        }

        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
        let volume = manager.get("db-data").unwrap();
        assert!(volume.mountpoint.join("base.sql").exists());
        assert!(volume.size().unwrap() > 0);
    }
}
