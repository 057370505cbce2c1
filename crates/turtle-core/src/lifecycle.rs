//! Connection lifecycle: one reusable connection per run or watch session,
//! closed at most once.

use crate::error::{DeployError, DeployErrorKind, DeployResult, MkdirError};
use crate::mirror;
use crate::retry::RetryPolicy;
use crate::transport::{ClosedFlag, Connector, Transport};
use crate::types::{MirrorStats, RemoteTarget, TransportKind};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ─── Guarded transport ───────────────────────────────────────────────

/// Wraps a transport so that no call reaches it once the closed flag is
/// set, and so that a `Disconnected` failure sets the flag.
pub struct GuardedTransport {
    inner: Box<dyn Transport>,
    closed: ClosedFlag,
}

impl GuardedTransport {
    fn ensure_open(&self) -> DeployResult<()> {
        if self.closed.is_closed() {
            return Err(DeployError::disconnected(format!(
                "{} connection is closed",
                self.inner.kind()
            )));
        }
        Ok(())
    }

    fn note_failure(&self, e: &DeployError) {
        if e.kind == DeployErrorKind::Disconnected && self.closed.mark() {
            warn!("{} connection dropped by remote: {}", self.inner.kind(), e);
        }
    }

    fn observe<T>(&self, result: DeployResult<T>) -> DeployResult<T> {
        if let Err(e) = &result {
            self.note_failure(e);
        }
        result
    }
}

#[async_trait]
impl Transport for GuardedTransport {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    async fn mkdir(&mut self, remote: &str) -> Result<(), MkdirError> {
        self.ensure_open()?;
        match self.inner.mkdir(remote).await {
            Err(MkdirError::Failed(e)) => {
                self.note_failure(&e);
                Err(MkdirError::Failed(e))
            }
            other => other,
        }
    }

    async fn upload_file(&mut self, local: &Path, remote: &str) -> DeployResult<u64> {
        self.ensure_open()?;
        let result = self.inner.upload_file(local, remote).await;
        self.observe(result)
    }

    async fn upload_tree(&mut self, local: &Path, remote: &str) -> DeployResult<MirrorStats> {
        self.ensure_open()?;
        if self.inner.has_tree_primitive() {
            let result = self.inner.upload_tree(local, remote).await;
            self.observe(result)
        } else {
            mirror::mirror_tree(self, local, remote).await
        }
    }

    async fn exec(&mut self, command: &str) -> DeployResult<String> {
        self.ensure_open()?;
        let result = self.inner.exec(command).await;
        self.observe(result)
    }

    async fn keepalive(&mut self) -> DeployResult<()> {
        self.ensure_open()?;
        let result = self.inner.keepalive().await;
        self.observe(result)
    }

    async fn close(&mut self) -> DeployResult<()> {
        if !self.closed.mark() {
            debug!("{} connection already closed", self.inner.kind());
            return Ok(());
        }
        self.inner.close().await
    }
}

// ─── Connection ──────────────────────────────────────────────────────

/// A live, variant-tagged session. Callers lock it for the duration of one
/// operation sequence; `release` closes it at most once.
pub struct Connection {
    id: String,
    kind: TransportKind,
    closed: ClosedFlag,
    transport: Mutex<GuardedTransport>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(inner: Box<dyn Transport>, closed: ClosedFlag) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: inner.kind(),
            closed: closed.clone(),
            transport: Mutex::new(GuardedTransport { inner, closed }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    /// Exclusive access to the transport. Waits for any in-flight call.
    pub async fn lock(&self) -> MutexGuard<'_, GuardedTransport> {
        self.transport.lock().await
    }

    /// Close the connection. Only the first caller reaches the underlying
    /// transport; later or concurrent calls return immediately.
    pub async fn release(&self) -> DeployResult<()> {
        if !self.closed.mark() {
            debug!("Connection {} already closed", self.id);
            return Ok(());
        }
        info!("Closing {} connection {}", self.kind, self.id);
        let mut guard = self.transport.lock().await;
        guard.inner.close().await
    }
}

// ─── Manager ─────────────────────────────────────────────────────────

/// Owns the single connection to the run's `RemoteTarget`.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    target: RemoteTarget,
    retry: RetryPolicy,
    current: Mutex<Option<Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, target: RemoteTarget) -> Self {
        Self {
            connector,
            target,
            retry: RetryPolicy::default(),
            current: Mutex::new(None),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Return the cached connection, or open a new one if there is none or
    /// the cached one has been closed.
    pub async fn acquire(&self) -> DeployResult<Arc<Connection>> {
        let mut slot = self.current.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
            info!("Connection {} was closed, reconnecting", conn.id());
        }

        let target = &self.target;
        let connector = &self.connector;
        let conn = self
            .retry
            .run(&format!("Connect to {}", target.address()), |_| async move {
                let closed = ClosedFlag::new();
                let transport = connector.connect(target, closed.clone()).await?;
                Ok(Connection::new(transport, closed))
            })
            .await?;
        let conn = Arc::new(conn);
        info!(
            "Connected to {} over {} ({})",
            target.address(),
            conn.kind(),
            conn.id()
        );
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Close and forget the current connection, if any.
    pub async fn release(&self) -> DeployResult<()> {
        let conn = self.current.lock().await.take();
        match conn {
            Some(conn) => conn.release().await,
            None => Ok(()),
        }
    }

    /// Drop `conn` after a failure so the next `acquire` reconnects. A newer
    /// connection already in the slot is left alone.
    pub async fn discard(&self, conn: &Arc<Connection>) {
        {
            let mut slot = self.current.lock().await;
            if slot.as_ref().map_or(false, |c| Arc::ptr_eq(c, conn)) {
                slot.take();
            }
        }
        if let Err(e) = conn.release().await {
            debug!("Ignoring close error on discarded connection: {}", e);
        }
    }

    /// Periodically ping the cached connection. A failed ping discards it so
    /// the next user reconnects.
    pub fn spawn_keepalive(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let conn = manager.current.lock().await.clone();
                let Some(conn) = conn else { continue };
                if conn.is_closed() {
                    continue;
                }
                let result = conn.lock().await.keepalive().await;
                if let Err(e) = result {
                    warn!("Keepalive on {} failed: {}", conn.id(), e);
                    manager.discard(&conn).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingConnector, RecordingTransport};
    use crate::types::Credential;
    use std::path::PathBuf;

    fn target() -> RemoteTarget {
        RemoteTarget {
            host: "files.example.org".into(),
            port: 22,
            username: "deploy".into(),
            credential: Credential::PrivateKey(PathBuf::from("/home/deploy/.ssh/id_ed25519")),
            remote_root: "/var/www".into(),
        }
    }

    fn manager(connector: &RecordingConnector) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(Arc::new(connector.clone()), target()))
    }

    #[tokio::test]
    async fn concurrent_releases_close_once() {
        let recorder = RecordingTransport::new();
        let conn = Arc::new(Connection::new(Box::new(recorder.clone()), ClosedFlag::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.release().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(recorder.close_count(), 1);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn closed_connection_rejects_calls() {
        let recorder = RecordingTransport::new();
        let conn = Connection::new(Box::new(recorder.clone()), ClosedFlag::new());
        conn.release().await.unwrap();

        let err = conn.lock().await.exec("true").await.unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::Disconnected);
        assert!(matches!(
            conn.lock().await.mkdir("/x").await,
            Err(MkdirError::Failed(_))
        ));
        conn.lock().await.close().await.unwrap();
        assert_eq!(recorder.calls(), vec![Call::Close]);
    }

    #[tokio::test]
    async fn remote_drop_skips_the_underlying_close() {
        let connector = RecordingConnector::new(RecordingTransport::new());
        let manager = manager(&connector);

        let conn = manager.acquire().await.unwrap();
        connector.last().unwrap().drop_remote();
        assert!(conn.is_closed());

        manager.release().await.unwrap();
        assert_eq!(connector.last().unwrap().close_count(), 0);
    }

    #[tokio::test]
    async fn disconnected_error_marks_connection_closed() {
        let recorder = RecordingTransport::new()
            .fail_upload("/var/www/a.txt", DeployError::disconnected("421 Timeout"));
        let conn = Connection::new(Box::new(recorder), ClosedFlag::new());
        let err = conn
            .lock()
            .await
            .upload_file(Path::new("/nonexistent"), "/var/www/a.txt")
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::Disconnected);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn acquire_reuses_until_closed() {
        let connector = RecordingConnector::new(RecordingTransport::new());
        let manager = manager(&connector);

        let first = manager.acquire().await.unwrap();
        let again = manager.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connector.attempts(), 1);

        connector.last().unwrap().drop_remote();
        let fresh = manager.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_retries_transient_connect_failures() {
        let connector = RecordingConnector::new(RecordingTransport::new())
            .failing_with(vec![DeployError::timeout("handshake"), DeployError::network("reset")]);
        let manager = manager(&connector);

        manager.acquire().await.unwrap();
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test]
    async fn acquire_does_not_retry_auth_failures() {
        let connector = RecordingConnector::new(RecordingTransport::new())
            .failing_with(vec![DeployError::auth("publickey rejected")]);
        let manager = manager(&connector);

        let err = manager.acquire().await.unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::Auth);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn connection_debug_names_the_session() {
        let conn = Connection::new(Box::new(RecordingTransport::new()), ClosedFlag::new());
        let shown = format!("{:?}", conn);
        assert!(shown.contains(conn.id()));
        assert!(shown.contains("closed: false"));
    }

    #[tokio::test]
    async fn discard_forces_reconnect() {
        let connector = RecordingConnector::new(RecordingTransport::new());
        let manager = manager(&connector);

        let first = manager.acquire().await.unwrap();
        manager.discard(&first).await;
        assert!(first.is_closed());
        let second = manager.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // stale discard leaves the newer connection in place
        manager.discard(&first).await;
        let third = manager.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_the_cached_connection() {
        let connector = RecordingConnector::new(RecordingTransport::new());
        let manager = manager(&connector);
        manager.acquire().await.unwrap();

        let task = manager.spawn_keepalive(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(61)).await;
        task.abort();

        let pings = connector
            .last()
            .unwrap()
            .calls()
            .into_iter()
            .filter(|c| *c == Call::Keepalive)
            .count();
        assert_eq!(pings, 2);
    }
}
