pub mod config;
pub mod error;
pub mod languages;
pub mod types;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError, ValidationError};
pub use languages::{Language, LanguageKind, LanguageTable};
pub use types::{
    CaptureMode, ExecutionRequest, ExecutionResult, RouteOutput, RouteOutputs,
    ValidationVerdict, TIMEOUT_EXIT_CODE,
};
