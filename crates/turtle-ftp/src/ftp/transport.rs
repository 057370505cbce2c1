//! `Transport` implementation over an `FtpClient`.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpErrorKind, FtpResult};
use crate::ftp::types::{FtpConnectionConfig, TreeUploadMode};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tracing::{info, warn};
use turtle_core::{
    mirror, ClosedFlag, DeployError, DeployResult, MirrorStats, MkdirError, Transport, TransportKind,
};

pub struct FtpTransport {
    client: FtpClient,
    closed: ClosedFlag,
    tree_mode: TreeUploadMode,
}

impl FtpTransport {
    pub async fn connect(config: FtpConnectionConfig, closed: ClosedFlag) -> DeployResult<Self> {
        let requested = config.options.tree_mode;
        let client = FtpClient::connect(config).await?;
        let tree_mode = match requested {
            TreeUploadMode::Auto if client.features.tvfs || client.is_unix() => TreeUploadMode::Mirror,
            TreeUploadMode::Auto => TreeUploadMode::ChangeDirectory,
            explicit => explicit,
        };
        info!("FTP session {} uses {:?} tree uploads", client.id, tree_mode);
        Ok(Self {
            client,
            closed,
            tree_mode,
        })
    }

    pub fn client(&self) -> &FtpClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut FtpClient {
        &mut self.client
    }

    /// Convert, and flag the connection as gone on EOF / 421.
    fn track<T>(&self, result: FtpResult<T>) -> DeployResult<T> {
        result.map_err(|e| {
            if e.kind == FtpErrorKind::Disconnected && self.closed.mark() {
                warn!("FTP session {} lost: {}", self.client.id, e);
            }
            DeployError::from(e)
        })
    }

    // ─── Change-directory tree upload ────────────────────────────

    async fn upload_tree_by_cwd(&mut self, local: &Path, remote: &str) -> DeployResult<MirrorStats> {
        let meta = fs::symlink_metadata(local).await?;
        if !meta.is_dir() {
            return Err(DeployError::walk("Local root is not a directory").with_path(local.display().to_string()));
        }
        let start = self.client.info.current_directory.clone();
        let entered = self.client.enter_dir_creating(remote).await;
        self.track(entered)?;

        let mut stats = MirrorStats::default();
        let result = self.put_children(local.to_path_buf(), &mut stats).await;

        // Always try to get back to where we started.
        let back = self.client.cwd(&start).await;
        result?;
        self.track(back)?;
        Ok(stats)
    }

    fn put_children<'a>(
        &'a mut self,
        dir: PathBuf,
        stats: &'a mut MirrorStats,
    ) -> Pin<Box<dyn Future<Output = DeployResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = Vec::new();
            let mut rd = fs::read_dir(&dir).await.map_err(|e| {
                DeployError::walk(format!("Cannot list directory: {}", e)).with_path(dir.display().to_string())
            })?;
            while let Some(entry) = rd.next_entry().await? {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = entry.path();
                let file_type = fs::symlink_metadata(&path).await?.file_type();
                if file_type.is_dir() {
                    let made = self.client.make_dir_here(&name).await;
                    if self.track(made)? {
                        stats.directories_created += 1;
                    } else {
                        stats.directories_existing += 1;
                    }
                    let entered = self.client.cwd(&name).await;
                    self.track(entered)?;
                    self.put_children(path, stats).await?;
                    let up = self.client.cdup().await;
                    self.track(up)?;
                } else if file_type.is_file() {
                    let stored = self.client.store(&path, &name).await;
                    let bytes = self.track(stored)?;
                    info!("Uploaded {} ({} bytes)", path.display(), bytes);
                    stats.files_uploaded += 1;
                    stats.bytes_uploaded += bytes;
                } else {
                    return Err(DeployError::walk("Path is not a regular file or directory")
                        .with_path(path.display().to_string()));
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Transport for FtpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ftp
    }

    async fn mkdir(&mut self, remote: &str) -> Result<(), MkdirError> {
        let result = self.client.make_dir(remote).await;
        if let Err(MkdirError::Failed(e)) = &result {
            if e.kind == turtle_core::DeployErrorKind::Disconnected {
                self.closed.mark();
            }
        }
        result
    }

    async fn upload_file(&mut self, local: &Path, remote: &str) -> DeployResult<u64> {
        let result = self.client.store(local, remote).await;
        self.track(result)
    }

    fn has_tree_primitive(&self) -> bool {
        self.tree_mode == TreeUploadMode::ChangeDirectory
    }

    async fn upload_tree(&mut self, local: &Path, remote: &str) -> DeployResult<MirrorStats> {
        match self.tree_mode {
            TreeUploadMode::ChangeDirectory => self.upload_tree_by_cwd(local, remote).await,
            _ => mirror::mirror_tree(self, local, remote).await,
        }
    }

    async fn keepalive(&mut self) -> DeployResult<()> {
        let result = self.client.noop().await;
        self.track(result)
    }

    async fn close(&mut self) -> DeployResult<()> {
        self.closed.mark();
        let result = self.client.quit().await;
        self.track(result)
    }
}
