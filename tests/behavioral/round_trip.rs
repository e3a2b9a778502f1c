// ABOUTME: Behavioral tests for running commands through master connections
//
// The fake ssh tests always run. The sshd tests need passwordless ssh to
// localhost and are skipped otherwise.

use super::fixtures::{short_socket_dir, FakeSsh};
use crate::require_ssh;
use anyhow::Result;
use pretty_assertions::assert_eq;
use ssh_muxer::Muxer;

/// A session spec from connect runs the command and captures both streams
#[tokio::test]
async fn test_exec_through_fake_master() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let ssh = muxer.connect("alpha").await?;
    let outcome = ssh
        .exec(["echo", "hello"])
        .await?
        .error_unless_exit_in(&[0])?
        .error_unless_stderr_contains("mux_client_request_session")?;

    assert_eq!(outcome.stdout_string(), "hello\n");
    assert_eq!(fake.masters()?.len(), 1);

    muxer.close().await;
    Ok(())
}

/// Remote exit codes come back unchanged and are not errors by themselves
#[tokio::test]
async fn test_exit_code_passes_through() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let outcome = muxer.connect("alpha").await?.exec(["exit", "3"]).await?;
    assert_eq!(outcome.exit_code(), 3);
    assert!(outcome.clone().error_unless_exit_in(&[0]).is_err());
    assert!(outcome.error_if_exit_in(&[0]).is_ok());

    muxer.close().await;
    Ok(())
}

/// Several sessions reuse the single master for their host
#[tokio::test]
async fn test_sessions_share_master() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    for i in 0..3 {
        let outcome = muxer
            .connect("alpha")
            .await?
            .exec(["echo".to_string(), i.to_string()])
            .await?;
        assert_eq!(outcome.stdout_string(), format!("{i}\n"));
    }
    assert_eq!(fake.masters()?.len(), 1);

    muxer.close().await;
    Ok(())
}

/// Real ControlMaster round trip against the local sshd
#[tokio::test]
async fn test_exec_through_local_sshd() -> Result<()> {
    require_ssh!();

    let sockets = short_socket_dir()?;
    let muxer =
        Muxer::with_sockets_in(sockets.path()).with_args(["-oBatchMode=yes", "-oConnectTimeout=5"]);

    let ssh = muxer.connect("localhost").await?;
    let outcome = ssh
        .with_args(["-v"])
        .exec(["echo", "'hello multiplexing world'"])
        .await?
        .error_unless_exit_in(&[0])?
        .error_unless_stderr_contains("mux_client_request_session")?;
    assert_eq!(outcome.stdout_string(), "hello multiplexing world\n");

    // A control socket exists while the master is up
    let sockets_present = std::fs::read_dir(sockets.path())?.count();
    assert_eq!(sockets_present, 1);

    muxer.close().await;
    Ok(())
}

/// scp through the master of the local sshd
#[tokio::test]
async fn test_copy_through_local_sshd() -> Result<()> {
    require_ssh!();

    let sockets = short_socket_dir()?;
    let work = tempfile::tempdir()?;
    let local = work.path().join("payload.txt");
    let remote = work.path().join("copied.txt");
    std::fs::write(&local, "payload\n")?;

    let muxer = Muxer::with_sockets_in(sockets.path()).with_args(["-oBatchMode=yes"]);
    let ssh = muxer.connect("localhost").await?;
    ssh.copy(&local, &remote).await?.error_unless_exit_in(&[0])?;

    assert_eq!(std::fs::read_to_string(&remote)?, "payload\n");

    muxer.close().await;
    Ok(())
}
