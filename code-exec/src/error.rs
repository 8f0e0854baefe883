use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::validator::UnsafeReason;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Input rejected: {0}")]
    Rejected(UnsafeReason),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Numeric limit exceeded: {0}")]
    NumericLimit(String),

    #[error("Resource exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("System error: {0}")]
    System(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure taxonomy shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Syntax,
    Timeout,
    ResourceExceeded,
    RuntimeFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceExceeded => "resource_exceeded",
            ErrorKind::RuntimeFailure => "runtime_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Rejected(_) | Error::NumericLimit(_) | Error::InvalidArgument(_) => {
                ErrorKind::Validation
            }
            Error::Syntax(_) => ErrorKind::Syntax,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ResourceExceeded(_) => ErrorKind::ResourceExceeded,
            Error::Evaluation(_) => ErrorKind::RuntimeFailure,
            Error::Sandbox(_) | Error::System(_) | Error::Config(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}
