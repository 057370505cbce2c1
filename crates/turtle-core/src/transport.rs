//! The `Transport` capability implemented by the FTP(S) and SFTP clients,
//! plus the connector seam used by the lifecycle manager.

use crate::error::{DeployError, DeployResult, MkdirError};
use crate::mirror;
use crate::types::{MirrorStats, RemoteTarget, TransportKind};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ─── Closed flag ─────────────────────────────────────────────────────

/// Shared "this connection is gone" marker.
///
/// One clone lives in the `Connection`, one in the transport so that
/// asynchronous end/close signals and caller-initiated closes converge on
/// the same bit.
#[derive(Debug, Clone, Default)]
pub struct ClosedFlag(Arc<AtomicBool>);

impl ClosedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag. Returns `true` only for the caller that performed the
    /// open → closed transition.
    pub fn mark(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

// ─── Transport ───────────────────────────────────────────────────────

/// A live session to a `RemoteTarget`.
///
/// Methods take `&mut self`: one outstanding call per connection.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Create a single remote directory (no parents).
    async fn mkdir(&mut self, remote: &str) -> Result<(), MkdirError>;

    /// Upload one local file, returning the number of bytes sent.
    async fn upload_file(&mut self, local: &Path, remote: &str) -> DeployResult<u64>;

    /// Whether `upload_tree` is a protocol-specific primitive rather than the
    /// generic mirror walk.
    fn has_tree_primitive(&self) -> bool {
        false
    }

    /// Mirror a whole local directory below `remote`.
    async fn upload_tree(&mut self, local: &Path, remote: &str) -> DeployResult<MirrorStats> {
        mirror::mirror_tree(self, local, remote).await
    }

    /// Run a shell command on the remote host and return its stdout.
    async fn exec(&mut self, command: &str) -> DeployResult<String> {
        let _ = command;
        Err(DeployError::unsupported(format!(
            "{} does not support remote command execution",
            self.kind()
        )))
    }

    /// Cheap round-trip that keeps idle connections from timing out.
    async fn keepalive(&mut self) -> DeployResult<()> {
        Ok(())
    }

    /// Tear the session down. Called at most once by `Connection`.
    async fn close(&mut self) -> DeployResult<()>;
}

/// Opens transports for a target. The production implementation picks FTP or
/// SFTP from the credential; tests plug in a recording fake.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &RemoteTarget,
        closed: ClosedFlag,
    ) -> DeployResult<Box<dyn Transport>>;
}
