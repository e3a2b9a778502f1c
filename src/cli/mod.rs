// ABOUTME: CLI argument parsing and command routing for ssh-muxer
//
// Provides command-line interface for:
// - Running a command on one or more hosts through shared masters (exec)
// - Copying a file to a host over its master (copy)

pub mod copy;
pub mod exec;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ssh_muxer::MuxerConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Run ssh commands over multiplexed ControlMaster connections
#[derive(Parser)]
#[command(name = "ssh-muxer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for control sockets (default: ~/.ssh-muxer/sockets)
    #[arg(long, global = true)]
    pub socket_dir: Option<PathBuf>,

    /// Remote user
    #[arg(long, short = 'l', global = true)]
    pub user: Option<String>,

    /// Maximum number of master connections kept open
    #[arg(long, global = true)]
    pub max_masters: Option<usize>,

    /// Seconds to wait for a master connection to come up
    #[arg(long, global = true)]
    pub handshake_timeout: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on one or more hosts
    Exec(ExecArgs),

    /// Copy a local file to a host
    Copy(CopyArgs),
}

/// Arguments for the exec command
#[derive(clap::Args)]
pub struct ExecArgs {
    /// Host to run on (repeat for several hosts)
    #[arg(long = "host", short = 'H', required = true)]
    pub hosts: Vec<String>,

    /// Command to run, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the copy command
#[derive(clap::Args)]
pub struct CopyArgs {
    /// Destination host
    #[arg(long, short = 'H')]
    pub host: String,

    /// Local file
    pub local: PathBuf,

    /// Path on the remote host
    pub remote: PathBuf,
}

impl Cli {
    /// Configuration file (if any) with command-line overrides applied
    pub fn muxer_config(&self) -> Result<MuxerConfig> {
        let mut config = match &self.config {
            Some(path) => MuxerConfig::load(path)?,
            None => MuxerConfig::default(),
        };

        if let Some(dir) = &self.socket_dir {
            config.socket_dir = Some(dir.clone());
        }
        if let Some(user) = &self.user {
            config.user = Some(user.clone());
        }
        if let Some(max) = self.max_masters {
            config.max_masters = Some(max);
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}
