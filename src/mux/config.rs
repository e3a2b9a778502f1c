// ABOUTME: Configuration for ssh connection multiplexing
//
// Defines MuxerConfig with all tunable parameters for the muxer:
// - ControlMaster socket location and naming
// - Cache bound for master connections
// - Handshake limit, keepalive interval and ready marker
// - ssh binary, default user and extra options

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ControlPath template expanded by ssh: host, port, remote user
pub const DEFAULT_CONTROL_PATH_TEMPLATE: &str = "%h-%p-%r";

/// Line fragment ssh -v prints once the master session is up
pub const DEFAULT_READY_MARKER: &str = "Entering interactive session";

/// Configuration for a [`Muxer`](super::Muxer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    // === Socket Location (SECURE: user-private directory) ===
    /// Directory for control sockets (default: ~/.ssh-muxer/sockets/)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,

    /// Socket file name inside `socket_dir`, with ssh `%` tokens
    pub control_path_template: String,

    // === Cache ===
    /// Maximum number of cached masters; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_masters: Option<usize>,

    // === Master Startup ===
    /// Give up on a master that has not become ready in this many seconds
    #[serde(
        with = "duration_secs_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub handshake_timeout: Option<Duration>,

    /// `ServerAliveInterval` passed to every master
    #[serde(with = "duration_secs")]
    pub server_alive_interval: Duration,

    /// Stderr fragment that marks a master as established
    pub ready_marker: String,

    // === Invocation ===
    /// ssh binary, looked up on PATH unless it contains a path separator
    pub ssh_binary: String,

    /// Remote user for every host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Extra ssh options applied to masters and sessions
    pub extra_args: Vec<String>,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            // Socket location determined at runtime via get_socket_dir()
            socket_dir: None,
            control_path_template: DEFAULT_CONTROL_PATH_TEMPLATE.to_string(),

            max_masters: None,

            handshake_timeout: None,
            server_alive_interval: Duration::from_secs(30),
            ready_marker: DEFAULT_READY_MARKER.to_string(),

            ssh_binary: crate::command::DEFAULT_SSH_BINARY.to_string(),
            user: None,
            extra_args: vec![],
        }
    }
}

impl MuxerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Effective cache bound
    pub fn capacity(&self) -> usize {
        self.max_masters.unwrap_or(usize::MAX)
    }

    /// Get the socket directory, creating it with secure permissions if needed
    ///
    /// Returns `~/.ssh-muxer/sockets/` by default, with mode 0700
    pub fn get_socket_dir(&self) -> std::io::Result<PathBuf> {
        let socket_dir = self.socket_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh-muxer")
                .join("sockets")
        });

        ensure_socket_dir(&socket_dir)?;
        Ok(socket_dir)
    }

    /// The `-oControlPath=...` option for this configuration
    pub fn control_path_option(&self) -> std::io::Result<String> {
        let socket_dir = self.get_socket_dir()?;
        Ok(control_path_option(&socket_dir, &self.control_path_template))
    }
}

/// `-oControlPath=<absolute dir>/<template>`
pub fn control_path_option(dir: &Path, template: &str) -> String {
    let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
    format!("-oControlPath={}", dir.join(template).display())
}

/// Ensure socket directory exists with secure permissions (mode 0700)
fn ensure_socket_dir(socket_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700); // rwx------
        std::fs::set_permissions(socket_dir, perms)?;
    }

    Ok(())
}

/// Serde helper for Duration as seconds (u64)
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Option<Duration> as seconds (u64)
mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
