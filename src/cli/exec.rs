// ABOUTME: CLI exec command - run one command on several hosts through the muxer
//
// Hosts run concurrently, each over its own master connection.

use super::{ExecArgs, OutputFormat};
use anyhow::{bail, Result};
use futures_util::future::join_all;
use serde::Serialize;
use ssh_muxer::{Muxer, ProcessOutcome};

/// Result of running the command on one host
#[derive(Debug, Clone, Serialize)]
pub struct HostResult {
    pub host: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResult {
    fn from_outcome(host: &str, outcome: &ProcessOutcome) -> Self {
        Self {
            host: host.to_string(),
            exit_code: Some(outcome.exit_code()),
            stdout: outcome.stdout_string(),
            stderr: outcome.stderr_string(),
            error: None,
        }
    }

    fn from_error(host: &str, error: &ssh_muxer::SshError) -> Self {
        Self {
            host: host.to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.to_string()),
        }
    }

    fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Execute the exec command
pub async fn execute(muxer: &Muxer, args: ExecArgs, format: OutputFormat) -> Result<()> {
    let results = run_on_hosts(muxer, &args.hosts, &args.command).await;

    match format {
        OutputFormat::Json => output_json(&results)?,
        OutputFormat::Text => output_text(&results),
    }

    let failed = results.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        bail!("{failed} of {} hosts failed", results.len());
    }
    Ok(())
}

/// Run `command` on every host concurrently
pub async fn run_on_hosts(muxer: &Muxer, hosts: &[String], command: &[String]) -> Vec<HostResult> {
    join_all(hosts.iter().map(|host| async move {
        let outcome = match muxer.connect(host).await {
            Ok(ssh) => ssh.exec(command.iter().cloned()).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => HostResult::from_outcome(host, &outcome),
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "Command failed to run");
                HostResult::from_error(host, &e)
            }
        }
    }))
    .await
}

fn output_json(results: &[HostResult]) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    println!("{json}");
    Ok(())
}

fn output_text(results: &[HostResult]) {
    let prefix_lines = results.len() > 1;

    for result in results {
        if let Some(error) = &result.error {
            eprintln!("{}: {error}", result.host);
            continue;
        }

        if prefix_lines {
            for line in result.stdout.lines() {
                println!("{}: {line}", result.host);
            }
            for line in result.stderr.lines() {
                eprintln!("{}: {line}", result.host);
            }
        } else {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
        }
    }
}
