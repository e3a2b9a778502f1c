// ABOUTME: Behavioral tests for per-host single-flight master startup
//
// Concurrent connects to one host must share one master, while a slow host
// must not hold up connects to other hosts.

use super::fixtures::FakeSsh;
use anyhow::Result;
use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use ssh_muxer::{Muxer, MuxerConfig, SshError};
use std::time::{Duration, Instant};

/// Eight simultaneous connects to one host start exactly one master
#[tokio::test]
async fn test_concurrent_connects_share_one_master() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let results = join_all((0..8).map(|_| muxer.connect("alpha"))).await;

    for result in &results {
        let spec = result.as_ref().map_err(Clone::clone)?;
        assert_eq!(spec.host(), "alpha");
    }
    assert_eq!(fake.master_hosts()?, vec!["alpha"]);
    assert_eq!(muxer.master_count(), 1);
    assert_eq!(muxer.metrics().snapshot().masters_started, 1);

    muxer.close().await;
    Ok(())
}

/// A master still handshaking does not block connects to another host
#[tokio::test]
async fn test_slow_host_does_not_block_other_hosts() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let shared = &muxer;
    let timed = move |host: &'static str| async move {
        let started = Instant::now();
        let result = shared.connect(host).await;
        (result, started.elapsed())
    };

    let ((slow, slow_elapsed), (fast, fast_elapsed)) =
        tokio::join!(timed("slow-host"), timed("fast-host"));

    slow?;
    fast?;
    assert!(
        fast_elapsed < Duration::from_millis(1500),
        "fast host took {fast_elapsed:?}"
    );
    assert!(slow_elapsed >= Duration::from_secs(2), "slow host took {slow_elapsed:?}");
    assert_eq!(muxer.master_count(), 2);

    muxer.close().await;
    Ok(())
}

/// Every waiter sees the failure, and the next connect tries again
#[tokio::test]
async fn test_failure_is_shared_then_retried() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let results = join_all((0..4).map(|_| muxer.connect("fail-host"))).await;
    for result in results {
        match result {
            Err(SshError::HandshakeFailed { host, diagnostics }) => {
                assert_eq!(host, "fail-host");
                assert!(diagnostics.contains("Connection refused"), "{diagnostics}");
            }
            other => panic!("Expected HandshakeFailed, got {other:?}"),
        }
    }
    assert_eq!(fake.masters()?.len(), 1);
    assert_eq!(muxer.master_count(), 0);

    assert!(muxer.connect("fail-host").await.is_err());
    assert_eq!(fake.masters()?.len(), 2);

    muxer.close().await;
    Ok(())
}

/// Giving up on connect leaves the handshake running: a later connect reuses
/// the master it produced, or retries if it failed
#[tokio::test]
async fn test_abandoned_connect_outcomes() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let gave_up = tokio::time::timeout(Duration::from_millis(50), muxer.connect("alpha")).await;
    assert!(gave_up.is_err());
    let gave_up =
        tokio::time::timeout(Duration::from_millis(50), muxer.connect("fail-host")).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(muxer.hosts(), vec!["alpha"]);

    muxer.connect("alpha").await?;
    assert!(muxer.connect("fail-host").await.is_err());

    assert_eq!(fake.master_hosts()?, vec!["alpha", "fail-host", "fail-host"]);
    assert_eq!(muxer.metrics().snapshot().masters_started, 3);

    muxer.close().await;
    Ok(())
}

/// With a bound of two, the least recently used master is evicted and stopped
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_lru_eviction_stops_master() -> Result<()> {
    use super::fixtures::wait_for_exit;

    let fake = FakeSsh::new()?;
    let muxer = Muxer::from_config(MuxerConfig {
        max_masters: Some(2),
        ..fake.config()
    })?;

    muxer.connect("a").await?;
    muxer.connect("b").await?;
    // Touch "a" so "b" becomes least recently used
    muxer.connect("a").await?;
    muxer.connect("c").await?;

    let mut hosts = muxer.hosts();
    hosts.sort();
    assert_eq!(hosts, vec!["a", "c"]);

    let (b_pid, _) = fake
        .masters()?
        .into_iter()
        .find(|(_, host)| host == "b")
        .ok_or_else(|| anyhow::anyhow!("No master logged for b"))?;
    assert!(
        wait_for_exit(b_pid, Duration::from_secs(5)).await,
        "evicted master {b_pid} still running"
    );
    assert_eq!(muxer.metrics().snapshot().evictions, 1);

    muxer.close().await;
    Ok(())
}
