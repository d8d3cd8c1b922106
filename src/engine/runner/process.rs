//! Child process execution with a hard wall-clock limit
//!
//! Every process is started in its own process group so that a timeout kills
//! the program together with anything it spawned. A process-count limit keeps
//! descendants from forking out of the group with `setsid`.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::TIMEOUT_EXIT_CODE;

/// How long to wait for pipe readers after the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed after exceeding the wall-clock limit
    TimedOut,
    /// Killed by signal
    Signaled(i32),
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Exited(0))
    }

    /// Shell-style exit code: 124 on timeout, 128+n when killed by signal n
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionStatus::Exited(code) => *code,
            ExecutionStatus::TimedOut => TIMEOUT_EXIT_CODE,
            ExecutionStatus::Signaled(sig) => 128 + sig,
        }
    }
}

#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    /// Address space limit in MB (None leaves it unlimited)
    pub memory_mb: Option<u32>,
    /// Largest file the process may write in KB
    pub fsize_kb: Option<u64>,
    /// RLIMIT_NPROC; counted per user, so it mostly stops further forks
    pub max_processes: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_mb: None,
            fsize_kb: None,
            max_processes: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    pub limits: ExecutionLimits,
}

impl ExecutionSpec {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            command: vec![],
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Run a command to completion or until its timeout, whichever comes first.
///
/// Errors are returned only when the process cannot be started or waited on;
/// non-zero exits and timeouts are reported through [`ExecutionStatus`].
pub async fn execute_local(spec: &ExecutionSpec) -> Result<ExecutionOutcome> {
    let (program, args) = spec
        .command
        .split_first()
        .context("No command specified for execution")?;

    let program = resolve_program(program, &spec.work_dir);
    debug!(?program, ?args, work_dir = ?spec.work_dir, "Spawning process");

    let mut cmd = Command::new(&program);
    cmd.args(args)
        .current_dir(&spec.work_dir)
        .env_clear()
        .env("PATH", host_path())
        .env("HOME", &spec.work_dir)
        .env("LANG", "C.UTF-8")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    let memory_bytes = spec.limits.memory_mb.map(|mb| u64::from(mb) * 1024 * 1024);
    let fsize_bytes = spec.limits.fsize_kb.map(|kb| kb * 1024);
    let cpu_secs = spec.limits.timeout.as_secs() + 1;
    let max_processes = spec.limits.max_processes;

    // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(bytes) = memory_bytes {
                setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
            }
            if let Some(bytes) = fsize_bytes {
                setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
            }
            if let Some(count) = max_processes {
                setrlimit(Resource::RLIMIT_NPROC, count, count)?;
            }
            setrlimit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs + 1)?;
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            Ok(())
        });
    }

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program.display()))?;
    let pid = child.id();

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let status = match tokio::time::timeout(spec.limits.timeout, child.wait()).await {
        Ok(exit) => {
            let exit = exit.context("Failed to wait for process")?;
            match (exit.code(), exit.signal()) {
                (Some(code), _) => ExecutionStatus::Exited(code),
                (None, Some(sig)) => ExecutionStatus::Signaled(sig),
                (None, None) => ExecutionStatus::Exited(-1),
            }
        }
        Err(_) => {
            kill_group(pid);
            if let Err(e) = child.wait().await {
                warn!("Failed to reap timed out process: {}", e);
            }
            ExecutionStatus::TimedOut
        }
    };

    // Descendants may still hold the pipes open after a normal exit.
    kill_group(pid);

    let stdout = drain(stdout_reader).await;
    let stderr = drain(stderr_reader).await;

    Ok(ExecutionOutcome {
        status,
        stdout,
        stderr,
        elapsed: started.elapsed(),
    })
}

/// `./prog` is resolved against the working directory rather than the caller's
fn resolve_program(program: &str, work_dir: &Path) -> PathBuf {
    match program.strip_prefix("./") {
        Some(rest) => work_dir.join(rest),
        None => PathBuf::from(program),
    }
}

fn host_path() -> String {
    std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string())
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, "Failed to kill process group: {}", e),
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!("pipe read ended with error: {}", e);
            }
            buf
        })
    })
}

async fn drain(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!("pipe reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            reader.abort();
            warn!("pipe still open after process exit, output discarded");
            String::new()
        }
    }
}
