use anyhow::Result;
use quizsync_core::FileKvStore;
use quizsync_sync::{Credentials, FileGateway, RemoteGateway, SynchronizerBuilder, Synchronizer};
use quizsync_test_utils::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn device(data_dir: &Path, remote: &Path) -> Result<(Synchronizer, Arc<FileGateway>)> {
    let gateway = Arc::new(FileGateway::new(remote));
    let sync = SynchronizerBuilder::new()
        .with_gateway(gateway.clone())
        .with_store(Arc::new(FileKvStore::open(data_dir)?))
        .with_config(fast_config())
        .build()?;
    sync.start()?;
    Ok((sync, gateway))
}

#[tokio::test]
async fn test_second_device_picks_up_first_devices_data() -> Result<()> {
    let remote = TempDir::new()?;
    let phone = TempDir::new()?;
    let laptop = TempDir::new()?;

    let (sync_a, _) = device(phone.path(), remote.path())?;
    assert!(sync_a.connect().await?.is_some());
    sync_a.mutate(|d| d.add_subject("Anatomy", None, None))?;
    sync_a
        .sign_up(&Credentials::new("pat@example.com", "hunter22"))
        .await?;
    assert!(sync_a.status().initial_sync_done);

    // The laptop restores the shared session through the event loop.
    let (sync_b, gateway_b) = device(laptop.path(), remote.path())?;
    let event_loop = sync_b.connect().await?.expect("gateway configured");
    assert!(gateway_b.auth_state().is_signed_in);
    assert!(wait_until(Duration::from_secs(2), || sync_b.status().initial_sync_done).await);

    assert_eq!(sync_b.data(), sync_a.data());
    assert_eq!(sync_b.data().subjects[0].name, "Anatomy");
    event_loop.abort();
    Ok(())
}

#[tokio::test]
async fn test_local_only_without_remote() -> Result<()> {
    let data_dir = TempDir::new()?;
    let gateway = Arc::new(FileGateway::new(""));
    let sync = SynchronizerBuilder::new()
        .with_gateway(gateway)
        .with_store(Arc::new(FileKvStore::open(data_dir.path())?))
        .with_config(fast_config())
        .build()?;
    sync.start()?;
    assert!(sync.connect().await?.is_none());

    sync.mutate(|d| d.add_subject("Offline", None, None))?;
    assert!(!sync.request_sync().await?);

    // Survives a restart through the on-device store alone.
    let (reopened, _) = device(data_dir.path(), Path::new(""))?;
    assert_eq!(reopened.data().subjects[0].name, "Offline");
    Ok(())
}

#[tokio::test]
async fn test_remote_removed_while_signed_in_degrades() -> Result<()> {
    let root = TempDir::new()?;
    let remote = root.path().join("remote");
    let data_dir = TempDir::new()?;

    let (sync, _) = device(data_dir.path(), &remote)?;
    sync.connect().await?;
    sync.sign_up(&Credentials::new("sam@example.com", "secret1"))
        .await?;

    std::fs::remove_dir_all(&remote)?;
    sync.mutate(|d| d.add_subject("Kept locally", None, None))?;
    assert!(sync.request_sync().await.is_err());
    assert!(sync.status().sync_failed);
    assert_eq!(sync.data().subjects.len(), 1);
    Ok(())
}
