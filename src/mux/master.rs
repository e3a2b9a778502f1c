// ABOUTME: A single ControlMaster ssh process kept open for one host
//
// Spawns `ssh -M -v ... -N host`, scans its stderr until ssh reports an interactive
// session, and from then on only answers "has it exited?" and "please stop".
// Remaining stderr is drained in the background so the master never blocks on a
// full pipe.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace, warn};

use crate::command::CommandSpec;
use crate::error::{Result, SshError};
use crate::process::resolve_program;

/// How a master decides it is ready
#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    /// Stderr fragment that marks the session as established
    pub ready_marker: String,
    /// Upper bound on the handshake; unbounded when `None`
    pub timeout: Option<Duration>,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            ready_marker: super::config::DEFAULT_READY_MARKER.to_string(),
            timeout: None,
        }
    }
}

/// Result of scanning the master's stderr
#[derive(Debug, PartialEq, Eq)]
enum Handshake {
    /// Ready marker seen
    Ready,
    /// Stream ended first; everything read so far
    Closed(String),
}

/// An established ControlMaster process
pub struct MasterConnection {
    host: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    terminated: AtomicBool,
}

impl std::fmt::Debug for MasterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterConnection")
            .field("host", &self.host)
            .field("pid", &self.pid)
            .field("terminated", &self.terminated.load(Ordering::SeqCst))
            .finish()
    }
}

impl MasterConnection {
    /// Spawn a master for `spec` and wait until it is established
    ///
    /// `spec` must already carry the master options (`-M -v`, keepalive); it is
    /// started with `-N` so no remote command runs.
    ///
    /// # Errors
    /// `SpawnFailed` if ssh cannot be started, `HandshakeFailed` if it exits before
    /// reporting a session, `HandshakeTimedOut` if `options.timeout` elapses first.
    pub async fn establish(spec: &CommandSpec, options: &HandshakeOptions) -> Result<Self> {
        let host = spec.host().to_string();
        let argv = spec.persistent_argv();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SshError::InvalidCommand("Command cannot be empty".to_string()))?;
        let resolved = resolve_program(program)?;

        debug!(host = %host, args = ?args, "Spawning master connection");

        let mut child = Command::new(&resolved)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SshError::spawn_failed(program.as_str(), e))?;

        let pid = child.id();
        let stderr = child.stderr.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "master stderr was not captured")
        })?;
        let mut lines = BufReader::new(stderr).split(b'\n');

        let scan = read_handshake(&mut lines, &options.ready_marker);
        let outcome = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, scan).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(host = %host, timeout_ms = limit.as_millis(), "Master handshake timed out");
                    let _ = child.start_kill();
                    return Err(SshError::HandshakeTimedOut {
                        host,
                        timeout: limit,
                    });
                }
            },
            None => scan.await,
        };

        match outcome {
            Ok(Handshake::Ready) => {}
            Ok(Handshake::Closed(diagnostics)) => {
                let _ = child.start_kill();
                return Err(SshError::HandshakeFailed { host, diagnostics });
            }
            Err(e) => {
                let _ = child.start_kill();
                return Err(e.into());
            }
        }

        info!(host = %host, pid = ?pid, "Master connection established");

        let drain_host = host.clone();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_segment().await {
                trace!(host = %drain_host, line = %String::from_utf8_lossy(&line), "master stderr");
            }
        });

        Ok(Self {
            host,
            pid,
            child: Mutex::new(child),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// PID of the ssh process as spawned
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking check that the ssh process has not exited or been told to stop
    pub fn is_alive(&self) -> bool {
        if self.terminated.load(Ordering::SeqCst) {
            return false;
        }

        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(host = %self.host, status = %status, "Master connection has exited");
                false
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "Failed to check master status");
                false
            }
        }
    }

    /// Ask the ssh process to stop without waiting for it
    ///
    /// Sends SIGTERM on unix so ssh can remove its control socket. Repeated calls
    /// are no-ops once the signal has been sent; a failed send is retried.
    pub fn terminate(&self) -> Result<()> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(());
        }
        if matches!(child.try_wait(), Ok(Some(_))) {
            self.terminated.store(true, Ordering::SeqCst);
            return Ok(());
        }

        info!(host = %self.host, pid = ?self.pid, "Terminating master connection");

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let pid = i32::try_from(pid)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)?;
            }
        }

        #[cfg(not(unix))]
        {
            child.start_kill()?;
        }

        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MasterConnection {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(host = %self.host, error = %e, "Failed to terminate master on drop");
        }
    }
}

/// Read `lines` until one contains `marker` or the stream ends
async fn read_handshake<R>(lines: &mut Split<R>, marker: &str) -> io::Result<Handshake>
where
    R: AsyncBufRead + Unpin,
{
    let mut diagnostics = String::new();

    while let Some(line) = lines.next_segment().await? {
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        trace!(line = %line, "master stderr");

        diagnostics.push_str(line);
        diagnostics.push('\n');

        if line.contains(marker) {
            return Ok(Handshake::Ready);
        }
    }

    Ok(Handshake::Closed(diagnostics))
}
