// ABOUTME: Behavioral tests for stale master detection
//
// A master that dies behind the muxer's back must be replaced on the next
// connect without the caller seeing an error.

use super::fixtures::FakeSsh;
use anyhow::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use pretty_assertions::assert_eq;
use std::time::Duration;

/// Kill the master with SIGKILL, then connect again
#[tokio::test]
async fn test_killed_master_is_replaced() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    muxer.connect("alpha").await?;
    let masters = fake.masters()?;
    assert_eq!(masters.len(), 1);
    let (first_pid, _) = masters[0].clone();

    kill(Pid::from_raw(first_pid), Signal::SIGKILL)?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let spec = muxer.connect("alpha").await?;
    assert_eq!(spec.host(), "alpha");

    let masters = fake.masters()?;
    assert_eq!(masters.len(), 2, "expected a replacement master");
    assert_ne!(masters[1].0, first_pid);
    assert_eq!(muxer.master_count(), 1);

    let metrics = muxer.metrics().snapshot();
    assert_eq!(metrics.stale_replaced, 1);
    assert_eq!(metrics.masters_started, 2);

    // The replacement is reused like any live master
    muxer.connect("alpha").await?;
    assert_eq!(fake.masters()?.len(), 2);

    muxer.close().await;
    Ok(())
}

/// A stale master for one host leaves other hosts' masters alone
#[tokio::test]
async fn test_stale_replacement_is_per_host() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    muxer.connect("alpha").await?;
    muxer.connect("beta").await?;

    let (alpha_pid, _) = fake
        .masters()?
        .into_iter()
        .find(|(_, host)| host == "alpha")
        .ok_or_else(|| anyhow::anyhow!("No master logged for alpha"))?;
    kill(Pid::from_raw(alpha_pid), Signal::SIGKILL)?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    muxer.connect("beta").await?;
    muxer.connect("alpha").await?;

    assert_eq!(fake.master_hosts()?, vec!["alpha", "beta", "alpha"]);
    assert_eq!(muxer.metrics().snapshot().stale_replaced, 1);

    muxer.close().await;
    Ok(())
}
