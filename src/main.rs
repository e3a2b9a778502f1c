// ABOUTME: Main entry point for ssh-muxer
//
// Binary: ssh-muxer
// Usage: ssh-muxer <COMMAND>
// - exec: run a command on one or more hosts over shared master connections
// - copy: scp a local file to a host

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;
use ssh_muxer::Muxer;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_logging(args.log_json);

    let muxer = Muxer::from_config(args.muxer_config()?)?;

    let result = match args.command {
        cli::Commands::Exec(exec_args) => cli::exec::execute(&muxer, exec_args, args.format).await,
        cli::Commands::Copy(copy_args) => cli::copy::execute(&muxer, copy_args, args.format).await,
    };

    // Stop every master before exiting, whatever the command returned
    muxer.close().await;

    let metrics = muxer.metrics().snapshot();
    tracing::debug!(
        masters_started = metrics.masters_started,
        handshake_failures = metrics.handshake_failures,
        "Muxer closed"
    );

    result
}

fn setup_logging(json: bool) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ssh_muxer=info".into());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(fmt_layer.json().with_ansi(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt_layer).with(filter).init();
    }
}
