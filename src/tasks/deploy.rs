//! One-shot deploy: build, connect, mirror the whole tree, disconnect.

use crate::tasks::build::Builder;
use std::path::Path;
use tracing::{error, info};
use turtle_core::{
    is_remote_root, ConnectionManager, DeployError, DeployResult, MirrorStats, Transport, TransportKind,
};
use turtle_sftp::shell_escape;

/// Run the whole pipeline once. The connection is released on every path
/// out, success or failure.
pub async fn run_deploy(manager: &ConnectionManager, builder: &dyn Builder, local_root: &Path) -> DeployResult<MirrorStats> {
    builder.build_all().await?;

    info!("Deploying...");
    let result = upload(manager, local_root).await;
    let released = manager.release().await;

    let stats = result.map_err(|e| {
        error!("Deployment failed: {}", e);
        e
    })?;
    released?;
    info!(
        "Deployment finished: {} files ({} bytes), {} directories created, {} already present",
        stats.files_uploaded, stats.bytes_uploaded, stats.directories_created, stats.directories_existing
    );
    Ok(stats)
}

async fn upload(manager: &ConnectionManager, local_root: &Path) -> DeployResult<MirrorStats> {
    let remote_root = manager.target().remote_root.clone();
    let conn = manager.acquire().await?;
    let mut transport = conn.lock().await;

    if transport.kind() == TransportKind::Sftp {
        ensure_remote_root(&mut *transport, &remote_root).await?;
    }
    check_local_root(local_root).await?;

    info!("Uploading {} to {}", local_root.display(), remote_root);
    transport.upload_tree(local_root, &remote_root).await
}

/// Make sure `root` exists on the server with a shell test-and-create.
pub async fn ensure_remote_root<T>(transport: &mut T, root: &str) -> DeployResult<()>
where
    T: Transport + ?Sized,
{
    if is_remote_root(root) {
        return Ok(());
    }
    let quoted = shell_escape(root);
    let status = transport
        .exec(&format!("test -d {} && echo exists || echo missing", quoted))
        .await?;
    if status.trim() != "exists" {
        info!("Creating remote directory: {}", root);
        transport.exec(&format!("mkdir -p {}", quoted)).await?;
    }
    Ok(())
}

async fn check_local_root(local_root: &Path) -> DeployResult<()> {
    let meta = tokio::fs::symlink_metadata(local_root).await.map_err(|e| {
        DeployError::walk(format!("Error accessing local path: {}", e)).with_path(local_root.display().to_string())
    })?;
    if !meta.is_dir() {
        return Err(DeployError::walk("Path is not a directory").with_path(local_root.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use turtle_core::testing::{Call, RecordingTransport};

    #[tokio::test]
    async fn existing_root_is_not_recreated() {
        let mut t = RecordingTransport::new()
            .exec_result("test -d '/var/www' && echo exists || echo missing", Ok("exists".into()));
        ensure_remote_root(&mut t, "/var/www").await.unwrap();
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_root_is_created_with_mkdir_p() {
        let mut t = RecordingTransport::new()
            .exec_result("test -d '/srv/my site' && echo exists || echo missing", Ok("missing".into()));
        ensure_remote_root(&mut t, "/srv/my site").await.unwrap();
        assert_eq!(t.calls()[1], Call::Exec("mkdir -p '/srv/my site'".into()));
    }

    #[tokio::test]
    async fn filesystem_root_needs_no_check() {
        let mut t = RecordingTransport::new();
        ensure_remote_root(&mut t, "/").await.unwrap();
        assert!(t.calls().is_empty());
    }

    #[tokio::test]
    async fn local_root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.html");
        std::fs::write(&file, "x").unwrap();
        assert!(check_local_root(&file).await.is_err());
        assert!(check_local_root(&dir.path().join("missing")).await.is_err());
        check_local_root(dir.path()).await.unwrap();
    }
}
