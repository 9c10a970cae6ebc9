use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("permission check failed: {0}")]
    PermissionCheck(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("failed to allocate local port: {0}")]
    PortAllocation(#[source] io::Error),

    #[error("failed to initialize portforward: {0}")]
    ForwarderInit(String),

    #[error("{0}")]
    Readiness(String),

    #[error("no portforward found with id '{0}'")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
