//! Service process lifecycle management

use super::config::{ProcessConfig, ProcessStatus};
use super::runtime::ServiceProcess;
use crate::error::{Result, StackupError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Process manager for handling service process lifecycle
///
/// Host ports are exclusively owned: starting a process binds its declared
/// host ports, and a port held by another process is a start-time error.
pub struct ProcessManager {
    /// All processes indexed by ID
    processes: Arc<RwLock<HashMap<String, ServiceProcess>>>,
    /// Bound host ports, port -> process ID
    ports: Arc<RwLock<HashMap<u16, String>>>,
    /// Base path for process working areas
    base_path: PathBuf,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;

        Ok(Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            ports: Arc::new(RwLock::new(HashMap::new())),
            base_path,
        })
    }

    /// Create a new process
    pub fn create(&self, config: ProcessConfig) -> Result<String> {
        let mut processes = self
            .processes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        if processes.values().any(|p| p.config.name == config.name) {
            return Err(StackupError::ProcessExists(config.name));
        }

        let process = ServiceProcess::new(config, &self.base_path);
        let id = process.id().to_string();
        processes.insert(id.clone(), process);

        Ok(id)
    }

    /// Start a process, binding its declared host ports
    pub fn start(&self, id: &str) -> Result<()> {
        let mut processes = self
            .processes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        let process = processes
            .get_mut(id)
            .ok_or_else(|| StackupError::ProcessNotFound(id.to_string()))?;

        process.begin_start()?;

        let mut ports = self
            .ports
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        let conflict = process.config.ports.iter().find_map(|mapping| {
            ports
                .get(&mapping.host_port)
                .filter(|holder| holder.as_str() != id)
                .map(|holder| (mapping.host_port, holder.clone()))
        });

        if let Some((port, held_by)) = conflict {
            process.mark_failed();
            return Err(StackupError::PortBound { port, held_by });
        }

        for mapping in &process.config.ports {
            ports.insert(mapping.host_port, id.to_string());
        }

        process.mark_running();
        Ok(())
    }

    /// Stop a process, releasing its host ports
    pub fn stop(&self, id: &str) -> Result<()> {
        let mut processes = self
            .processes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        let process = processes
            .get_mut(id)
            .ok_or_else(|| StackupError::ProcessNotFound(id.to_string()))?;

        process.stop()?;
        self.release_ports(id)?;

        Ok(())
    }

    /// Remove a process
    pub fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut processes = self
            .processes
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        let process = processes
            .get_mut(id)
            .ok_or_else(|| StackupError::ProcessNotFound(id.to_string()))?;

        if process.is_running() {
            if !force {
                return Err(StackupError::Process(format!(
                    "Process {} is running; stop it or remove with force",
                    id
                )));
            }
            process.stop()?;
        }

        process.remove()?;
        processes.remove(id);
        self.release_ports(id)?;

        Ok(())
    }

    /// Get process configuration by ID
    pub fn get(&self, id: &str) -> Result<ProcessConfig> {
        let processes = self
            .processes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        processes
            .get(id)
            .map(|p| p.config.clone())
            .ok_or_else(|| StackupError::ProcessNotFound(id.to_string()))
    }

    /// List all processes
    pub fn list(&self, all: bool) -> Result<Vec<ProcessConfig>> {
        let processes = self
            .processes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        let result: Vec<ProcessConfig> = processes
            .values()
            .filter(|p| all || p.config.status == ProcessStatus::Running)
            .map(|p| p.config.clone())
            .collect();

        Ok(result)
    }

    /// Find process by name
    pub fn find_by_name(&self, name: &str) -> Result<Option<ProcessConfig>> {
        let processes = self
            .processes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        let result = processes
            .values()
            .find(|p| p.config.name == name)
            .map(|p| p.config.clone());

        Ok(result)
    }

    /// Answer which process owns a bound host port
    ///
    /// A request to a bound host port reaches this process's listener.
    pub fn lookup_host_port(&self, port: u16) -> Result<Option<ProcessConfig>> {
        let ports = self
            .ports
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        let Some(id) = ports.get(&port).cloned() else {
            return Ok(None);
        };
        drop(ports);

        let processes = self
            .processes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(processes.get(&id).map(|p| p.config.clone()))
    }

    /// Get process count
    pub fn count(&self) -> Result<usize> {
        let processes = self
            .processes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(processes.len())
    }

    /// Get running process count
    pub fn running_count(&self) -> Result<usize> {
        let processes = self
            .processes
            .read()
            .map_err(|_| StackupError::Lock("Failed to acquire read lock".to_string()))?;

        let count = processes
            .values()
            .filter(|p| p.config.status == ProcessStatus::Running)
            .count();

        Ok(count)
    }

    fn release_ports(&self, id: &str) -> Result<()> {
        let mut ports = self
            .ports
            .write()
            .map_err(|_| StackupError::Lock("Failed to acquire write lock".to_string()))?;

        ports.retain(|_, holder| *holder != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_start_stop() {
        let temp = tempdir().unwrap();
        let manager = ProcessManager::new(temp.path().to_path_buf()).unwrap();

        let config = ProcessConfig::new("db", "postgres:15").port(5432, 5432);
        let id = manager.create(config).unwrap();
        manager.start(&id).unwrap();

        assert_eq!(manager.running_count().unwrap(), 1);

        manager.stop(&id).unwrap();
        assert_eq!(manager.running_count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let temp = tempdir().unwrap();
        let manager = ProcessManager::new(temp.path().to_path_buf()).unwrap();

        manager.create(ProcessConfig::new("db", "postgres:15")).unwrap();
        let result = manager.create(ProcessConfig::new("db", "postgres:16"));

        assert!(matches!(result, Err(StackupError::ProcessExists(_))));
    }

    #[test]
    fn test_port_bind_conflict_fails_start() {
        let temp = tempdir().unwrap();
        let manager = ProcessManager::new(temp.path().to_path_buf()).unwrap();

        let first = manager
            .create(ProcessConfig::new("backend", "api:latest").port(8000, 8000))
            .unwrap();
        manager.start(&first).unwrap();

        let second = manager
            .create(ProcessConfig::new("intruder", "api:latest").port(8000, 80))
            .unwrap();
        let result = manager.start(&second);

        assert!(matches!(result, Err(StackupError::PortBound { port: 8000, .. })));
        assert_eq!(
            manager.get(&second).unwrap().status,
            ProcessStatus::Failed
        );
        // The original owner keeps the port
        let owner = manager.lookup_host_port(8000).unwrap().unwrap();
        assert_eq!(owner.name, "backend");
    }

    #[test]
    fn test_host_port_reaches_listener() {
        let temp = tempdir().unwrap();
        let manager = ProcessManager::new(temp.path().to_path_buf()).unwrap();

        let id = manager
            .create(ProcessConfig::new("frontend", "web:latest").port(3000, 3000))
            .unwrap();
        manager.start(&id).unwrap();

        let owner = manager.lookup_host_port(3000).unwrap().unwrap();
        assert_eq!(owner.name, "frontend");
        assert_eq!(owner.status, ProcessStatus::Running);
        assert_eq!(owner.ports[0].container_port, 3000);
    }

    #[test]
    fn test_stop_releases_ports() {
        let temp = tempdir().unwrap();
        let manager = ProcessManager::new(temp.path().to_path_buf()).unwrap();

        let id = manager
            .create(ProcessConfig::new("frontend", "web:latest").port(3000, 3000))
            .unwrap();
        manager.start(&id).unwrap();
        manager.stop(&id).unwrap();

        assert!(manager.lookup_host_port(3000).unwrap().is_none());
    }
}
