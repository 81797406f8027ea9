//! Running external programs with bounded wall-clock time.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Last non-empty stderr line, for error messages.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Run `program` with `args`, draining stdout and stderr concurrently so a
/// chatty child can never block on a full pipe. The child is killed if it
/// outlives `timeout`.
pub async fn run_command<S: AsRef<std::ffi::OsStr>>(
    program: &Path,
    args: &[S],
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let name = program.display().to_string();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: name.clone(),
            source,
        })?;

    let io_error = |source| ProcessError::Io {
        program: name.clone(),
        source,
    };
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(std::io::Error::other("stdout not captured")))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(std::io::Error::other("stderr not captured")))?;

    let run = async {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let (out_read, err_read) =
            tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        out_read?;
        err_read?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out, err))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok((status, stdout, stderr))) => {
            for line in String::from_utf8_lossy(&stderr).lines() {
                debug!("{}: {}", name, line);
            }
            debug!("{} exited with {}", name, status);
            Ok(CommandOutput {
                status,
                stdout,
                stderr,
            })
        }
        Ok(Err(source)) => Err(io_error(source)),
        // The child is killed when it drops on return.
        Err(_) => Err(ProcessError::Timeout {
            program: name.clone(),
            timeout,
        }),
    }
}
