use std::path::Path;

use anyhow::Result;
use tracing::debug;

use super::process::{execute_local, ExecutionLimits, ExecutionSpec, ExecutionStatus};

/// Result of a compilation attempt
#[derive(Debug)]
pub struct CompileResult {
    pub success: bool,
    pub exit_code: i32,
    /// Compiler diagnostics, present on failure
    pub message: Option<String>,
}

/// Run the compiler for a prepared source directory
pub async fn compile(
    source_dir: &Path,
    compile_cmd: &[String],
    limits: ExecutionLimits,
) -> Result<CompileResult> {
    if compile_cmd.is_empty() {
        return Ok(CompileResult {
            success: true,
            exit_code: 0,
            message: None,
        });
    }

    debug!("Compiling with {:?}", compile_cmd);

    let spec = ExecutionSpec::new(source_dir)
        .with_command(compile_cmd)
        .with_limits(limits);

    let result = execute_local(&spec).await?;

    if result.is_success() {
        return Ok(CompileResult {
            success: true,
            exit_code: 0,
            message: None,
        });
    }

    let error_msg = if !result.stderr.trim().is_empty() {
        result.stderr
    } else if !result.stdout.trim().is_empty() {
        result.stdout
    } else {
        match result.status {
            ExecutionStatus::TimedOut => "Compilation timed out".to_string(),
            ExecutionStatus::Signaled(_) => "Compiler crashed".to_string(),
            ExecutionStatus::Exited(code) => format!("Compilation failed with exit code {}", code),
        }
    };

    Ok(CompileResult {
        success: false,
        exit_code: result.status.exit_code(),
        message: Some(error_msg),
    })
}
