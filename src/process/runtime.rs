//! Service process runtime implementation

use super::config::{ProcessConfig, ProcessStatus};
use crate::error::{Result, StackupError};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Service process instance
#[derive(Debug)]
pub struct ServiceProcess {
    /// Process configuration
    pub config: ProcessConfig,
    /// Process working area on the host
    pub dir: PathBuf,
}

impl ServiceProcess {
    /// Create a new service process
    pub fn new(config: ProcessConfig, base_path: &Path) -> Self {
        let dir = base_path.join(&config.id);
        Self { config, dir }
    }

    /// Get process ID
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Get process name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get process status
    pub fn status(&self) -> ProcessStatus {
        self.config.status
    }

    /// Check if the process is running
    pub fn is_running(&self) -> bool {
        self.config.status == ProcessStatus::Running
    }

    /// Issue the start command
    ///
    /// Valid only from `created` or `stopped`. The process stays in
    /// `starting` until port bindings succeed and `mark_running` is called.
    pub fn begin_start(&mut self) -> Result<()> {
        match self.config.status {
            ProcessStatus::Created | ProcessStatus::Stopped => {
                self.config.status = ProcessStatus::Starting;
                Ok(())
            }
            ProcessStatus::Running => {
                Err(StackupError::ProcessAlreadyRunning(self.config.id.clone()))
            }
            ProcessStatus::Starting => Err(StackupError::Process(format!(
                "Process {} is already starting",
                self.config.id
            ))),
            ProcessStatus::Failed => Err(StackupError::Process(format!(
                "Process {} failed and must be recreated",
                self.config.id
            ))),
        }
    }

    /// Mark the process as running
    pub fn mark_running(&mut self) {
        self.config.status = ProcessStatus::Running;
        self.config.started_at = Some(Utc::now());
    }

    /// Mark a failed start
    pub fn mark_failed(&mut self) {
        self.config.status = ProcessStatus::Failed;
        self.config.finished_at = Some(Utc::now());
        self.config.exit_code = Some(1);
    }

    /// Stop the process
    pub fn stop(&mut self) -> Result<()> {
        if self.config.status != ProcessStatus::Running {
            return Err(StackupError::ProcessNotRunning(self.config.id.clone()));
        }

        self.config.status = ProcessStatus::Stopped;
        self.config.finished_at = Some(Utc::now());
        self.config.exit_code = Some(0);

        Ok(())
    }

    /// Remove the process working area
    pub fn remove(&mut self) -> Result<()> {
        if self.config.status == ProcessStatus::Running {
            return Err(StackupError::Process(
                "Cannot remove a running process".to_string(),
            ));
        }

        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn process(name: &str) -> ServiceProcess {
        let config = ProcessConfig::new(name, "postgres:15");
        ServiceProcess::new(config, &PathBuf::from("/tmp/stackup-test"))
    }

    #[test]
    fn test_start_stop_transitions() {
        let mut proc = process("db");
        assert_eq!(proc.status(), ProcessStatus::Created);

        proc.begin_start().unwrap();
        assert_eq!(proc.status(), ProcessStatus::Starting);

        proc.mark_running();
        assert!(proc.is_running());

        proc.stop().unwrap();
        assert_eq!(proc.status(), ProcessStatus::Stopped);
        assert_eq!(proc.config.exit_code, Some(0));

        // A stopped process may be started again
        proc.begin_start().unwrap();
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut proc = process("backend");
        proc.begin_start().unwrap();
        proc.mark_failed();

        assert_eq!(proc.status(), ProcessStatus::Failed);
        assert!(proc.begin_start().is_err());
        assert!(proc.stop().is_err());
    }

    #[test]
    fn test_stop_requires_running() {
        let mut proc = process("frontend");
        assert!(proc.stop().is_err());
    }
}
