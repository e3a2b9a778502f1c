// ABOUTME: Runs a subprocess to completion and captures its exit code and output
//
// Stdout and stderr are drained concurrently by tokio while waiting for the child,
// so a chatty process can never stall on a full pipe. The captured outcome carries
// assertion helpers that turn unexpected exit codes or output into errors.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SshError};

/// Captured result of a finished subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ProcessOutcome {
    /// Build an outcome from raw parts
    #[must_use]
    pub const fn new(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
        }
    }

    /// Exit code, or `-1` when the process was killed by a signal
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Whether the process exited with code 0
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Raw stdout bytes (empty when stdout was inherited)
    #[must_use]
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Raw stderr bytes (empty when stderr was inherited)
    #[must_use]
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Stdout decoded as UTF-8, with invalid sequences replaced
    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded as UTF-8, with invalid sequences replaced
    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Fail unless the exit code is one of `codes`
    pub fn error_unless_exit_in(self, codes: &[i32]) -> Result<Self> {
        if codes.contains(&self.exit_code) {
            Ok(self)
        } else {
            Err(self.failure(format!(
                "exit code {} not in {codes:?}",
                self.exit_code
            )))
        }
    }

    /// Fail if the exit code is one of `codes`
    pub fn error_if_exit_in(self, codes: &[i32]) -> Result<Self> {
        if codes.contains(&self.exit_code) {
            Err(self.failure(format!("exit code {} in {codes:?}", self.exit_code)))
        } else {
            Ok(self)
        }
    }

    /// Fail unless stdout contains `needle`
    pub fn error_unless_stdout_contains(self, needle: &str) -> Result<Self> {
        if self.stdout_string().contains(needle) {
            Ok(self)
        } else {
            Err(self.failure(format!("stdout does not contain {needle:?}")))
        }
    }

    /// Fail if stdout contains `needle`
    pub fn error_if_stdout_contains(self, needle: &str) -> Result<Self> {
        if self.stdout_string().contains(needle) {
            Err(self.failure(format!("stdout contains {needle:?}")))
        } else {
            Ok(self)
        }
    }

    /// Fail unless stderr contains `needle`
    pub fn error_unless_stderr_contains(self, needle: &str) -> Result<Self> {
        if self.stderr_string().contains(needle) {
            Ok(self)
        } else {
            Err(self.failure(format!("stderr does not contain {needle:?}")))
        }
    }

    /// Fail if stderr contains `needle`
    pub fn error_if_stderr_contains(self, needle: &str) -> Result<Self> {
        if self.stderr_string().contains(needle) {
            Err(self.failure(format!("stderr contains {needle:?}")))
        } else {
            Ok(self)
        }
    }

    /// Fail with the captured stdout as the message if the exit code is non-zero
    pub fn explode_on_error(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SshError::CommandFailed(self.stdout_string()))
        }
    }

    fn failure(&self, reason: String) -> SshError {
        let stderr = self.stderr_string();
        let stderr = stderr.trim();
        if stderr.is_empty() {
            SshError::CommandFailed(reason)
        } else {
            SshError::CommandFailed(format!("{reason}; stderr: {stderr}"))
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.stdout))
    }
}

/// Runs argument vectors as subprocesses
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run `argv` to completion
    ///
    /// # Arguments
    /// * `inherit_stdout` - Pass the child's stdout straight through instead of capturing it
    /// * `inherit_stderr` - Pass the child's stderr straight through instead of capturing it
    /// * `argv` - Program followed by its arguments
    ///
    /// # Errors
    /// `InvalidCommand` for an empty `argv`, `SpawnFailed` if the program cannot be
    /// started, `Io` if waiting on it fails.
    pub async fn run(
        inherit_stdout: bool,
        inherit_stderr: bool,
        argv: &[String],
    ) -> Result<ProcessOutcome> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SshError::InvalidCommand("Command cannot be empty".to_string()))?;
        let resolved = resolve_program(program)?;

        debug!(command = %program, args = ?args, "Running process");

        let child = Command::new(&resolved)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdio(inherit_stdout))
            .stderr(stdio(inherit_stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SshError::spawn_failed(program.as_str(), e))?;

        let output = child.wait_with_output().await?;
        let exit_code = output.status.code().unwrap_or(-1);

        debug!(command = %program, exit_code = exit_code, "Process finished");

        Ok(ProcessOutcome::new(exit_code, output.stdout, output.stderr))
    }
}

fn stdio(inherit: bool) -> Stdio {
    if inherit {
        Stdio::inherit()
    } else {
        Stdio::piped()
    }
}

/// Resolve a bare program name on `PATH`; explicit paths are used as given
pub(crate) fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.is_empty() {
        return Err(SshError::InvalidCommand(
            "Program cannot be empty".to_string(),
        ));
    }

    if Path::new(program).components().count() > 1 {
        return Ok(PathBuf::from(program));
    }

    which::which(program).map_err(|e| {
        SshError::spawn_failed(program, io::Error::new(io::ErrorKind::NotFound, e.to_string()))
    })
}
