//! Running external commands (`git`, `rsync`, user scripts)

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{error, info};

use crate::error::WorkerError;

/// Bytes kept from each of stdout and stderr; anything earlier is dropped
pub const OUTPUT_LIMIT: usize = 64 * 1024;
const TRUNCATED_MARKER: &str = "[earlier output truncated]\n";

/// A command line plus the directory to run it in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a command that exited successfully
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// stdout followed by stderr
    pub output: String,
}

/// Every external process the worker starts goes through this trait. Spawn
/// failures and non-zero exits both come back as `WorkerError::CommandFailed`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, WorkerError>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, WorkerError> {
        let command_line = spec.to_string();
        let cwd = spec
            .cwd
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        info!("Running (cwd = '{}'): {}", cwd, command_line);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // the child is killed and reaped if we stop waiting on it
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let failed = |stage: &str, e: io::Error| {
            error!("{} failed to {}: {}", command_line, stage, e);
            WorkerError::CommandFailed {
                command: command_line.clone(),
                status: format!("failed to {}: {}", stage, e),
                output: String::new(),
            }
        };

        let mut child = command.spawn().map_err(|e| failed("start", e))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = async {
            let (stdout, stderr) = tokio::try_join!(read_tail(stdout), read_tail(stderr))?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((status, stdout, stderr))
        };

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, finished).await {
                Ok(result) => result,
                Err(_) => {
                    error!("{} timed out after {:?}", command_line, limit);
                    return Err(WorkerError::CommandTimedOut {
                        command: command_line,
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => finished.await,
        };
        let (status, stdout, stderr) = result.map_err(|e| failed("complete", e))?;

        let mut combined = stdout;
        combined.push_str(&stderr);

        if status.success() {
            info!("{} output:\n{}", command_line, combined);
            Ok(CommandOutput { output: combined })
        } else {
            error!("{} failed ({}):\n{}", command_line, status, combined);
            Err(WorkerError::CommandFailed {
                command: command_line,
                status: status.to_string(),
                output: combined,
            })
        }
    }
}

/// Drain `pipe`, keeping only the last `OUTPUT_LIMIT` bytes
async fn read_tail<R>(pipe: Option<R>) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        kept.extend_from_slice(&chunk[..n]);
        if kept.len() > OUTPUT_LIMIT {
            kept.drain(..kept.len() - OUTPUT_LIMIT);
            truncated = true;
        }
    }

    let text = String::from_utf8_lossy(&kept);
    Ok(if truncated {
        format!("{}{}", TRUNCATED_MARKER, text)
    } else {
        text.into_owned()
    })
}
