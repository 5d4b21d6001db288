//! Error types for Vagrant provider operations.

use thiserror::Error;
use vm_core::VmError;

/// Errors that can occur while driving the `vagrant` and `VBoxManage` tools.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// `vagrant box add` found the box already installed. Callers fetching a
    /// box treat this as success.
    #[error("Box already exists: {0}")]
    BoxAlreadyExists(String),

    #[error("Invalid Vagrant path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unable to parse output: {0}")]
    Parse(String),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),
}

impl From<VmError> for ProviderError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::Io(e) => ProviderError::IoError(e),
            VmError::Dependency(dep) => ProviderError::DependencyNotFound(dep),
            VmError::Command(msg) => ProviderError::CommandFailed(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
