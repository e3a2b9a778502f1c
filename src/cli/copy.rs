// ABOUTME: CLI copy command - scp a local file to a host over its master connection

use super::{CopyArgs, OutputFormat};
use anyhow::{Context, Result};
use ssh_muxer::Muxer;

/// Execute the copy command
pub async fn execute(muxer: &Muxer, args: CopyArgs, format: OutputFormat) -> Result<()> {
    let ssh = muxer
        .connect(&args.host)
        .await
        .with_context(|| format!("Failed to connect to {}", args.host))?;

    let outcome = ssh
        .copy(&args.local, &args.remote)
        .await?
        .error_unless_exit_in(&[0])
        .with_context(|| format!("Failed to copy {} to {}", args.local.display(), args.host))?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "host": args.host,
                "local": args.local,
                "remote": args.remote,
                "exit_code": outcome.exit_code(),
            })
        ),
        OutputFormat::Text => println!(
            "Copied {} to {}:{}",
            args.local.display(),
            args.host,
            args.remote.display()
        ),
    }

    Ok(())
}
