//! Directory mirror engine.
//!
//! Walks a local tree depth-first in pre-order and reproduces it through a
//! `Transport`:
//!
//! - a directory's remote mkdir is issued before anything beneath it;
//! - "already exists" counts as success, "parent missing" creates the
//!   parent chain and retries, anything else aborts the walk;
//! - files make sure their parent exists, then upload;
//! - symlinks and special files are walk errors.
//!
//! Calls are strictly sequential. Siblings are visited in name order so
//! runs are reproducible.

use crate::error::{DeployError, DeployResult, MkdirError};
use crate::transport::Transport;
use crate::types::{is_remote_root, join_remote, parent_remote, MirrorStats, TransferKind, TransferTask};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tracing::{debug, info};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Mirror the directory `local_root` into `remote_root`.
pub async fn mirror_tree<T>(
    transport: &mut T,
    local_root: &Path,
    remote_root: &str,
) -> DeployResult<MirrorStats>
where
    T: Transport + ?Sized,
{
    let meta = stat(local_root).await?;
    if !meta.is_dir() {
        return Err(DeployError::walk("Local root is not a directory")
            .with_path(local_root.display().to_string()));
    }

    info!(
        "Mirroring {} -> {} over {}",
        local_root.display(),
        remote_root,
        transport.kind()
    );
    let mut mirror = Mirror::new(transport);
    mirror
        .visit_dir(local_root.to_path_buf(), remote_root.to_string())
        .await?;
    Ok(mirror.stats)
}

/// Mirror a single path, file or directory, to `remote`. Used for
/// change-triggered uploads where the path may be either.
pub async fn mirror_path<T>(transport: &mut T, local: &Path, remote: &str) -> DeployResult<MirrorStats>
where
    T: Transport + ?Sized,
{
    let mut mirror = Mirror::new(transport);
    mirror.visit(local.to_path_buf(), remote.to_string()).await?;
    Ok(mirror.stats)
}

/// Classify a local path into the task the walk would produce for it.
pub async fn plan_task(local: &Path, remote: &str) -> DeployResult<TransferTask> {
    let meta = stat(local).await?;
    let kind = if meta.is_dir() {
        TransferKind::Directory
    } else if meta.file_type().is_file() {
        TransferKind::File
    } else {
        return Err(not_regular(local));
    };
    Ok(TransferTask {
        local: local.to_path_buf(),
        remote: remote.to_string(),
        kind,
    })
}

// ─── Walk state ──────────────────────────────────────────────────────

struct Mirror<'t, T: ?Sized> {
    transport: &'t mut T,
    /// Remote directories known to exist during this run.
    ensured: HashSet<String>,
    stats: MirrorStats,
}

impl<'t, T> Mirror<'t, T>
where
    T: Transport + ?Sized,
{
    fn new(transport: &'t mut T) -> Self {
        Self {
            transport,
            ensured: HashSet::new(),
            stats: MirrorStats::default(),
        }
    }

    fn visit<'a>(&'a mut self, local: PathBuf, remote: String) -> BoxFuture<'a, DeployResult<()>> {
        Box::pin(async move {
            let task = plan_task(&local, &remote).await?;
            match task.kind {
                TransferKind::Directory => self.visit_dir(task.local, task.remote).await,
                TransferKind::File => self.visit_file(task.local, task.remote).await,
            }
        })
    }

    async fn visit_dir(&mut self, local: PathBuf, remote: String) -> DeployResult<()> {
        self.ensure_dir(&remote).await?;
        for (name, child) in read_sorted(&local).await? {
            let child_remote = join_remote(&remote, &name);
            self.visit(child, child_remote).await?;
        }
        Ok(())
    }

    async fn visit_file(&mut self, local: PathBuf, remote: String) -> DeployResult<()> {
        if let Some(parent) = parent_remote(&remote) {
            self.ensure_dir(&parent).await?;
        }
        let bytes = self.transport.upload_file(&local, &remote).await?;
        info!("Uploaded {} -> {} ({} bytes)", local.display(), remote, bytes);
        self.stats.files_uploaded += 1;
        self.stats.bytes_uploaded += bytes;
        Ok(())
    }

    /// Make sure `remote` exists, creating missing parents on demand.
    fn ensure_dir<'a>(&'a mut self, remote: &'a str) -> BoxFuture<'a, DeployResult<()>> {
        Box::pin(async move {
            if is_remote_root(remote) || self.ensured.contains(remote) {
                return Ok(());
            }

            match self.transport.mkdir(remote).await {
                Ok(()) => self.created(remote),
                Err(MkdirError::AlreadyExists) => self.existing(remote),
                Err(MkdirError::MissingParent) => {
                    let parent = parent_remote(remote)
                        .filter(|p| p != remote && !is_remote_root(p))
                        .ok_or_else(|| missing_parent(remote))?;
                    debug!("Parent of {} is missing, creating {}", remote, parent);
                    self.ensure_dir(&parent).await?;
                    match self.transport.mkdir(remote).await {
                        Ok(()) => self.created(remote),
                        Err(MkdirError::AlreadyExists) => self.existing(remote),
                        Err(MkdirError::MissingParent) => return Err(missing_parent(remote)),
                        Err(MkdirError::Failed(e)) => return Err(e),
                    }
                }
                Err(MkdirError::Failed(e)) => return Err(e),
            }
            self.ensured.insert(remote.to_string());
            Ok(())
        })
    }

    fn created(&mut self, remote: &str) {
        info!("Created remote directory {}", remote);
        self.stats.directories_created += 1;
    }

    fn existing(&mut self, remote: &str) {
        debug!("Remote directory {} already exists", remote);
        self.stats.directories_existing += 1;
    }
}

// ─── Local filesystem ────────────────────────────────────────────────

async fn stat(path: &Path) -> DeployResult<std::fs::Metadata> {
    fs::symlink_metadata(path).await.map_err(|e| {
        DeployError::walk(format!("Cannot stat: {}", e)).with_path(path.display().to_string())
    })
}

async fn read_sorted(dir: &Path) -> DeployResult<Vec<(String, PathBuf)>> {
    let list_err = |e: std::io::Error| {
        DeployError::walk(format!("Cannot list directory: {}", e)).with_path(dir.display().to_string())
    };
    let mut rd = fs::read_dir(dir).await.map_err(list_err)?;
    let mut entries = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(list_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((name, entry.path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn not_regular(path: &Path) -> DeployError {
    DeployError::walk("Path is not a regular file or directory").with_path(path.display().to_string())
}

fn missing_parent(remote: &str) -> DeployError {
    DeployError::transfer("Cannot create remote directory: parent directory is missing")
        .with_path(remote)
}
