// ABOUTME: Immutable builder describing how to invoke ssh and scp
//
// Every `with_*` method returns a new CommandSpec; a spec is never changed after
// it is built, so derived specs can be handed out freely without affecting the
// template they came from.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::process::{ProcessOutcome, ProcessRunner};

/// Default remote-shell client, looked up on `PATH`
pub const DEFAULT_SSH_BINARY: &str = "ssh";

/// Default file-copy client, looked up on `PATH`
pub const DEFAULT_SCP_BINARY: &str = "scp";

/// Description of an ssh invocation against a single host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Remote user, empty for the ssh default
    user: String,
    /// Remote-shell binary
    binary: String,
    /// File-copy binary
    copy_binary: String,
    /// Options placed before the destination
    args: Vec<String>,
    /// Destination host
    host: String,
    /// Let the child write to our stdout
    inherit_stdout: bool,
    /// Let the child write to our stderr
    inherit_stderr: bool,
}

impl CommandSpec {
    /// Start a spec targeting `host` with no options
    pub fn to_host(host: impl Into<String>) -> Self {
        Self {
            user: String::new(),
            binary: DEFAULT_SSH_BINARY.to_string(),
            copy_binary: DEFAULT_SCP_BINARY.to_string(),
            args: Vec::new(),
            host: host.into(),
            inherit_stdout: false,
            inherit_stderr: false,
        }
    }

    /// Same spec, different host
    #[must_use]
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }

    /// Same spec with `args` appended to the option list
    #[must_use]
    pub fn with_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.args.extend(args.into_iter().map(Into::into));
        next
    }

    /// Same spec, connecting as `user`
    ///
    /// A trailing `@` is accepted and ignored, so `"deploy"` and `"deploy@"` are equivalent.
    #[must_use]
    pub fn with_user(&self, user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            user: user.trim_end_matches('@').to_string(),
            ..self.clone()
        }
    }

    /// Use an alternate ssh config file (`-F`)
    #[must_use]
    pub fn with_config_file(&self, path: impl AsRef<Path>) -> Self {
        self.with_args(["-F".to_string(), absolute(path.as_ref())])
    }

    /// Use an alternate known-hosts file
    #[must_use]
    pub fn with_user_known_hosts_file(&self, path: impl AsRef<Path>) -> Self {
        self.with_args([
            "-o".to_string(),
            format!("UserKnownHostsFile={}", absolute(path.as_ref())),
        ])
    }

    /// Turn host key verification on or off
    #[must_use]
    pub fn with_strict_host_key_checking(&self, strict: bool) -> Self {
        let value = if strict { "yes" } else { "no" };
        self.with_args(["-o".to_string(), format!("StrictHostKeyChecking={value}")])
    }

    /// Pass the child's stderr through to ours instead of capturing it
    #[must_use]
    pub fn inherit_standard_err(&self) -> Self {
        Self {
            inherit_stderr: true,
            ..self.clone()
        }
    }

    /// Pass the child's stdout through to ours instead of capturing it
    #[must_use]
    pub fn inherit_standard_out(&self) -> Self {
        Self {
            inherit_stdout: true,
            ..self.clone()
        }
    }

    /// Use a different remote-shell binary
    #[must_use]
    pub fn with_binary(&self, binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..self.clone()
        }
    }

    /// Use a different file-copy binary
    #[must_use]
    pub fn with_copy_binary(&self, binary: impl Into<String>) -> Self {
        Self {
            copy_binary: binary.into(),
            ..self.clone()
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn copy_binary(&self) -> &str {
        &self.copy_binary
    }

    pub const fn inherits_stdout(&self) -> bool {
        self.inherit_stdout
    }

    pub const fn inherits_stderr(&self) -> bool {
        self.inherit_stderr
    }

    /// `user@host`, or just `host` when no user is set
    pub fn destination(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }

    /// Full argument vector for running `command` on the remote host
    pub fn exec_argv<I, S>(&self, command: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        argv.push(self.binary.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(self.destination());
        argv.extend(command.into_iter().map(Into::into));
        argv
    }

    /// Full argument vector for copying `local` to `remote`
    pub fn copy_argv(&self, local: &Path, remote: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        argv.push(self.copy_binary.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(absolute(local));
        argv.push(format!("{}:{}", self.destination(), remote.display()));
        argv
    }

    /// Argument vector for a session that runs no command and stays open (`-N`)
    pub(crate) fn persistent_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        argv.push(self.binary.clone());
        argv.extend(self.args.iter().cloned());
        argv.push("-N".to_string());
        argv.push(self.destination());
        argv
    }

    /// Run `command` on the remote host and wait for it to finish
    pub async fn exec<I, S>(&self, command: I) -> Result<ProcessOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = self.exec_argv(command);
        ProcessRunner::run(self.inherit_stdout, self.inherit_stderr, &argv).await
    }

    /// Copy the local file `local` to `remote` on the host
    pub async fn copy(
        &self,
        local: impl AsRef<Path>,
        remote: impl AsRef<Path>,
    ) -> Result<ProcessOutcome> {
        let argv = self.copy_argv(local.as_ref(), remote.as_ref());
        ProcessRunner::run(self.inherit_stdout, self.inherit_stderr, &argv).await
    }
}

/// Absolute form of `path`, falling back to the path as given
fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .display()
        .to_string()
}
