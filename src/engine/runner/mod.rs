//! Runner module - run-to-completion execution of single sources
//!
//! Each call gets its own scratch directory, compiles when the language needs
//! it and runs the program with a hard timeout:
//! `Preparing -> Running -> {Completed | TimedOut | Failed}`.
//! A failed compilation goes straight to `Failed` without entering `Running`.

pub mod compiler;
pub mod entrypoint;
pub mod process;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info};

use crate::core::config::RunnerConfig;
use crate::core::{Language, LanguageTable};

use compiler::compile;
use entrypoint::detect_java_entry;
use process::{execute_local, ExecutionLimits, ExecutionSpec, ExecutionStatus};

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Preparing,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Preparing => "preparing",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::TimedOut => "timed_out",
            RunPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Output of a run, whatever its outcome
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Terminal phase
    pub phase: RunPhase,
    pub success: bool,
    pub stdout: String,
    /// Program stderr, or compiler diagnostics when compilation failed
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl RunOutput {
    /// Compilation failed and the program never ran
    pub fn compile_failed(&self) -> bool {
        self.phase == RunPhase::Failed
    }
}

/// Substituted for `{entry}` in languages that do not name their entry point
const DEFAULT_ENTRY: &str = "main";

pub struct LanguageRunner {
    config: RunnerConfig,
    languages: Arc<LanguageTable>,
}

impl LanguageRunner {
    pub fn new(config: RunnerConfig, languages: Arc<LanguageTable>) -> Self {
        Self { config, languages }
    }

    /// File name the source is written under, e.g. `Main.java`
    pub fn source_file_name(&self, source: &str, language: Language) -> Option<String> {
        self.languages
            .get(language)
            .map(|config| config.resolve(&entry_name(source, language)).source_file)
    }

    /// Compile (if needed) and run `source` under `timeout`.
    ///
    /// Timeouts, crashes and compile errors are reported in the returned
    /// [`RunOutput`]; `Err` means the run could not be set up at all.
    pub async fn run(&self, source: &str, language: Language, timeout: Duration) -> Result<RunOutput> {
        let started = Instant::now();
        let lang_config = self
            .languages
            .get(language)
            .with_context(|| format!("{} is not a run-to-completion language", language))?;

        let mut phase = RunPhase::Preparing;
        debug!(%language, %phase, "Run started");

        fs::create_dir_all(&self.config.work_root)
            .await
            .with_context(|| format!("Failed to create {:?}", self.config.work_root))?;
        // Removed on drop, on every return path below
        let workdir = tempfile::Builder::new()
            .prefix("codeshot-run-")
            .tempdir_in(&self.config.work_root)
            .context("Failed to create run directory")?;

        let commands = lang_config.resolve(&entry_name(source, language));

        fs::write(workdir.path().join(&commands.source_file), source)
            .await
            .context("Failed to write source file")?;

        if let Some(compile_cmd) = &commands.compile_command {
            let limits = ExecutionLimits {
                timeout: self.config.compile_timeout,
                memory_mb: None,
                fsize_kb: Some(self.config.fsize_kb),
                max_processes: None,
            };
            let compiled = compile(workdir.path(), compile_cmd, limits).await?;
            if !compiled.success {
                phase = RunPhase::Failed;
                info!(%language, %phase, exit_code = compiled.exit_code, "Compilation failed");
                return Ok(RunOutput {
                    phase,
                    success: false,
                    stdout: String::new(),
                    stderr: compiled.message.unwrap_or_default(),
                    exit_code: compiled.exit_code,
                    duration: started.elapsed(),
                });
            }
        }

        phase = RunPhase::Running;
        debug!(%language, %phase, "Running program");

        let memory_mb = lang_config
            .limit_address_space
            .then(|| lang_config.calculate_memory_limit(self.config.memory_limit_mb));
        let spec = ExecutionSpec::new(workdir.path())
            .with_command(&commands.run_command)
            .with_limits(ExecutionLimits {
                timeout,
                memory_mb,
                fsize_kb: Some(self.config.fsize_kb),
                max_processes: lang_config
                    .limit_processes
                    .then_some(self.config.process_limit),
            });

        let outcome = execute_local(&spec).await?;

        phase = match outcome.status {
            ExecutionStatus::TimedOut => RunPhase::TimedOut,
            _ => RunPhase::Completed,
        };
        info!(
            %language,
            %phase,
            exit_code = outcome.exit_code(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Run finished"
        );

        Ok(RunOutput {
            phase,
            success: outcome.is_success(),
            exit_code: outcome.exit_code(),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            duration: started.elapsed(),
        })
    }
}

fn entry_name(source: &str, language: Language) -> String {
    match language {
        Language::Java => detect_java_entry(source),
        _ => DEFAULT_ENTRY.to_string(),
    }
}
