use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure classification attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationRejected,
    CompileFailed,
    RuntimeTimeout,
    RuntimeCrashed,
    NoFreePort,
    ContainerCrashed,
    ServeTimeout,
    CaptureFailed,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ValidationRejected => "validation_rejected",
            ErrorKind::CompileFailed => "compile_failed",
            ErrorKind::RuntimeTimeout => "runtime_timeout",
            ErrorKind::RuntimeCrashed => "runtime_crashed",
            ErrorKind::NoFreePort => "no_free_port",
            ErrorKind::ContainerCrashed => "container_crashed",
            ErrorKind::ServeTimeout => "serve_timeout",
            ErrorKind::CaptureFailed => "capture_failed",
            ErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{}", s)
    }
}

/// Why a source was refused before execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Code too long: {len} characters (maximum {max})")]
    TooLarge { len: usize, max: usize },
    #[error("Syntax error: {0}")]
    SyntaxInvalid(String),
    #[error("Capability denied: {0}")]
    CapabilityDenied(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Unsafe project path: {0}")]
    UnsafePath(String),
    #[error("Entry file not found in project: {0}")]
    MissingEntry(String),
}

/// Every way a pipeline stage can fail
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation rejected: {0}")]
    ValidationRejected(#[from] ValidationError),
    #[error("Compilation failed with exit code {exit_code}:\n{diagnostics}")]
    CompileFailed { exit_code: i32, diagnostics: String },
    #[error("Execution timed out after {}s", timeout.as_secs_f64())]
    RuntimeTimeout { timeout: Duration },
    #[error("Process exited with code {exit_code}:\n{stderr}")]
    RuntimeCrashed { exit_code: i32, stderr: String },
    #[error("No free port after {attempts} attempts")]
    NoFreePort { attempts: u32 },
    #[error("Container exited before becoming ready. Logs:\n{logs}")]
    ContainerCrashed { logs: String },
    #[error("Dev server did not become ready in time. Logs:\n{logs}")]
    ServeTimeout { logs: String },
    #[error("Capture failed for route {route}: {reason}")]
    CaptureFailed { route: String, reason: String },
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ValidationRejected(_) => ErrorKind::ValidationRejected,
            PipelineError::CompileFailed { .. } => ErrorKind::CompileFailed,
            PipelineError::RuntimeTimeout { .. } => ErrorKind::RuntimeTimeout,
            PipelineError::RuntimeCrashed { .. } => ErrorKind::RuntimeCrashed,
            PipelineError::NoFreePort { .. } => ErrorKind::NoFreePort,
            PipelineError::ContainerCrashed { .. } => ErrorKind::ContainerCrashed,
            PipelineError::ServeTimeout { .. } => ErrorKind::ServeTimeout,
            PipelineError::CaptureFailed { .. } => ErrorKind::CaptureFailed,
            PipelineError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Logs captured from the container, if this failure carries any
    pub fn logs(&self) -> Option<&str> {
        match self {
            PipelineError::ContainerCrashed { logs } | PipelineError::ServeTimeout { logs } => {
                Some(logs)
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Unexpected(format!("{:#}", err))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Unexpected(format!("I/O error: {}", err))
    }
}
