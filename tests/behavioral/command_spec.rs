// ABOUTME: Behavioral tests for specs handed out by the muxer
//
// Specs are values: deriving or running one never changes another, and every
// session spec points at its master's control socket.

use super::fixtures::FakeSsh;
use anyhow::Result;
use pretty_assertions::assert_eq;
use ssh_muxer::CommandSpec;
use std::path::Path;

/// Session specs carry the ControlPath option and the configured user
#[tokio::test]
async fn test_session_spec_layout() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?.with_user("deploy");

    let ssh = muxer.connect("db1").await?;
    let socket_dir = fake.dir.path().join("sockets");

    assert_eq!(ssh.host(), "db1");
    assert_eq!(ssh.user(), "deploy");
    assert_eq!(
        ssh.exec_argv(["uptime"]),
        vec![
            fake.binary.display().to_string(),
            format!("-oControlPath={}/%h-%p-%r", socket_dir.display()),
            "deploy@db1".to_string(),
            "uptime".to_string(),
        ]
    );

    assert_eq!(
        ssh.copy_argv(Path::new("/tmp/a.tar"), Path::new("/srv/a.tar"))
            .last()
            .map(String::as_str),
        Some("deploy@db1:/srv/a.tar")
    );

    muxer.close().await;
    Ok(())
}

/// Changing a spec handed out by connect leaves the muxer's template alone
#[tokio::test]
async fn test_handed_out_spec_is_independent() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;

    let ssh = muxer.connect("alpha").await?;
    let verbose = ssh.with_args(["-v"]).with_host("beta");

    assert_eq!(ssh.host(), "alpha");
    assert!(!ssh.args().iter().any(|arg| arg == "-v"));
    assert_eq!(verbose.host(), "beta");
    assert_eq!(muxer.base().args(), ssh.args());

    let again = muxer.connect("alpha").await?;
    assert_eq!(again, ssh);

    muxer.close().await;
    Ok(())
}

/// Specs can be cloned into tasks and run concurrently
#[tokio::test]
async fn test_specs_are_shareable_across_tasks() -> Result<()> {
    let fake = FakeSsh::new()?;
    let muxer = fake.muxer()?;
    let ssh = muxer.connect("alpha").await?;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ssh: CommandSpec = ssh.clone();
            tokio::spawn(async move { ssh.exec(["echo".to_string(), i.to_string()]).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await??;
        assert_eq!(outcome.stdout_string(), format!("{i}\n"));
    }

    muxer.close().await;
    Ok(())
}
