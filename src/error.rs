//! Error types for stackup

use thiserror::Error;

/// Result type for stackup operations
pub type Result<T> = std::result::Result<T, StackupError>;

/// Stackup error types
#[derive(Error, Debug)]
pub enum StackupError {
    #[error("Process error: {0}")]
    Process(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Process already exists: {0}")]
    ProcessExists(String),

    #[error("Process already running: {0}")]
    ProcessAlreadyRunning(String),

    #[error("Process not running: {0}")]
    ProcessNotRunning(String),

    #[error("Host port {port} already bound by {held_by}")]
    PortBound { port: u16, held_by: String },

    #[error("Image error: {0}")]
    Image(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Build file parse error at line {line}: {message}")]
    BuildFileParse { line: usize, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Stack error: {0}")]
    Stack(String),

    #[error("Descriptor parse error: {0}")]
    DescriptorParse(String),

    #[error("Env file error: {0}")]
    EnvFile(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
