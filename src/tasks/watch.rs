//! Deploy-on-change: one long-lived connection shared by every change event.

use crate::config::LocalPaths;
use crate::tasks::build::Builder;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use turtle_core::{join_remote, mirror_path, ConnectionManager, DeployError, DeployResult, MirrorStats};
use turtle_watch::{ChangeKind, Debouncer, FsEvent, TreeWatcher};

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct WatchSession {
    manager: Arc<ConnectionManager>,
    builder: Arc<dyn Builder>,
    paths: LocalPaths,
    debounce: Duration,
    keepalive: Duration,
}

impl WatchSession {
    pub fn new(manager: Arc<ConnectionManager>, builder: Arc<dyn Builder>, paths: LocalPaths, debounce: Duration) -> Self {
        Self {
            manager,
            builder,
            paths,
            debounce,
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    /// Watch until `shutdown` resolves, then release the connection.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> DeployResult<()> {
        let mut site = open_watcher(&self.paths.website);
        let mut scripts = open_watcher(&self.paths.scripts);
        if site.is_none() && scripts.is_none() {
            return Err(DeployError::walk("Nothing to watch: neither the website nor the script folder exists"));
        }

        let (uploads, mut upload_rx) = Debouncer::<String, PathBuf>::new(self.debounce);
        let (rebuilds, mut rebuild_rx) = Debouncer::<(), ()>::new(self.debounce);
        let keepalive = self.manager.spawn_keepalive(self.keepalive);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(ev) = next_event(&mut site) => route_site_event(ev, &uploads),
                Some(ev) = next_event(&mut scripts) => {
                    if ev.kind == ChangeKind::Change {
                        rebuilds.push((), ());
                    }
                }
                Some((key, path)) = upload_rx.recv() => {
                    match self.upload_change(&key, &path).await {
                        Ok(Some(_)) => info!("Uploaded {}", path.display()),
                        Ok(None) => {}
                        Err(e) => error!("Error uploading {}: {}", key, e),
                    }
                }
                Some(_) = rebuild_rx.recv() => {
                    let builder = Arc::clone(&self.builder);
                    tokio::spawn(async move {
                        if let Err(e) = builder.build_scripts(true).await {
                            error!("JavaScript rebuild failed: {}", e);
                        }
                    });
                }
            }
        }

        info!("Stopping watch");
        keepalive.abort();
        self.manager.release().await
    }

    /// Upload one debounced key through the shared connection. A transient
    /// failure drops the connection and the upload is retried on a new one.
    /// Returns `None` when the path disappeared before the timer fired.
    pub async fn upload_change(&self, key: &str, path: &Path) -> DeployResult<Option<MirrorStats>> {
        if tokio::fs::symlink_metadata(path).await.is_err() {
            info!("{} no longer exists, skipping upload", path.display());
            return Ok(None);
        }
        let remote = join_remote(&self.manager.target().remote_root, key);
        let manager = &self.manager;
        let remote = remote.as_str();
        let stats = manager
            .retry_policy()
            .run(&format!("Upload {}", key), |_| async move {
                let conn = manager.acquire().await?;
                let result = {
                    let mut transport = conn.lock().await;
                    mirror_path(&mut *transport, path, remote).await
                };
                if let Err(e) = &result {
                    if e.is_transient() {
                        manager.discard(&conn).await;
                    }
                }
                result
            })
            .await?;
        Ok(Some(stats))
    }
}

fn open_watcher(root: &Path) -> Option<TreeWatcher> {
    match TreeWatcher::start(root) {
        Ok(w) => {
            info!("Watching for changes in folder '{}'...", root.display());
            Some(w)
        }
        Err(e) => {
            error!("Folder '{}' not found: {}", root.display(), e);
            None
        }
    }
}

async fn next_event(watcher: &mut Option<TreeWatcher>) -> Option<FsEvent> {
    match watcher {
        Some(w) => w.next().await,
        None => std::future::pending().await,
    }
}

/// Only content changes reach the debouncer.
pub fn route_site_event(ev: FsEvent, uploads: &Debouncer<String, PathBuf>) {
    match ev.kind {
        ChangeKind::Change => uploads.push(ev.key, ev.path),
        ChangeKind::Rename => info!("{} renamed; not uploading", ev.key),
        ChangeKind::Remove => info!("{} removed; remote copy left in place", ev.key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use turtle_core::testing::{RecordingConnector, RecordingTransport};
    use turtle_core::{Credential, RemoteTarget, RetryPolicy};

    struct NoBuild;

    #[async_trait]
    impl Builder for NoBuild {
        async fn build_all(&self) -> DeployResult<()> {
            Ok(())
        }
        async fn build_scripts(&self, _quiet: bool) -> DeployResult<()> {
            Ok(())
        }
    }

    fn session(connector: &RecordingConnector, site: &Path) -> WatchSession {
        let target = RemoteTarget {
            host: "example.org".into(),
            port: 22,
            username: "deploy".into(),
            credential: Credential::PrivateKey(PathBuf::from("/keys/id_ed25519")),
            remote_root: "/www".into(),
        };
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let manager = Arc::new(ConnectionManager::new(Arc::new(connector.clone()), target).with_retry(retry));
        let paths = LocalPaths {
            website: site.to_path_buf(),
            scripts: site.join("no-scripts"),
        };
        WatchSession::new(manager, Arc::new(NoBuild), paths, Duration::from_millis(500))
    }

    fn event(kind: ChangeKind, key: &str, root: &Path) -> FsEvent {
        FsEvent {
            kind,
            key: key.into(),
            path: root.join(key),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_uploads_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "v5").unwrap();
        let recorder = RecordingTransport::new();
        let connector = RecordingConnector::new(recorder.clone());
        let watch = session(&connector, dir.path());

        let (uploads, mut rx) = Debouncer::new(Duration::from_millis(500));
        for _ in 0..5 {
            route_site_event(event(ChangeKind::Change, "index.html", dir.path()), &uploads);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        route_site_event(event(ChangeKind::Rename, "old.html", dir.path()), &uploads);
        route_site_event(event(ChangeKind::Remove, "gone.html", dir.path()), &uploads);
        tokio::time::sleep(Duration::from_secs(1)).await;

        while let Ok((key, path)) = rx.try_recv() {
            watch.upload_change(&key, &path).await.unwrap();
        }
        assert_eq!(recorder.uploads(), vec!["/www/index.html".to_string()]);
        assert_eq!(recorder.file("/www/index.html").unwrap(), b"v5");
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn vanished_path_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let connector = RecordingConnector::new(RecordingTransport::new());
        let watch = session(&connector, dir.path());
        let result = watch.upload_change("tmp.swp", &dir.path().join("tmp.swp")).await.unwrap();
        assert!(result.is_none());
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn failed_upload_leaves_the_session_usable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.css"), "a").unwrap();
        std::fs::write(dir.path().join("b.css"), "b").unwrap();
        let recorder = RecordingTransport::new().fail_upload("/www/a.css", DeployError::transfer("550 denied"));
        let connector = RecordingConnector::new(recorder.clone());
        let watch = session(&connector, dir.path());

        assert!(watch.upload_change("a.css", &dir.path().join("a.css")).await.is_err());
        watch.upload_change("b.css", &dir.path().join("b.css")).await.unwrap();
        // non-transient failures are not retried and keep the connection
        assert_eq!(connector.attempts(), 1);
        assert_eq!(recorder.uploads(), vec!["/www/a.css".to_string(), "/www/b.css".to_string()]);
    }

    #[tokio::test]
    async fn dropped_connection_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "js").unwrap();
        let connector = RecordingConnector::new(RecordingTransport::new());
        let watch = session(&connector, dir.path());

        watch.upload_change("app.js", &dir.path().join("app.js")).await.unwrap();
        connector.last().unwrap().drop_remote();
        watch.upload_change("app.js", &dir.path().join("app.js")).await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn missing_roots_fail_the_watch() {
        let dir = tempfile::tempdir().unwrap();
        let connector = RecordingConnector::new(RecordingTransport::new());
        let watch = session(&connector, &dir.path().join("nope"));
        let err = watch.run(std::future::ready(())).await.unwrap_err();
        assert!(err.message.contains("Nothing to watch"));
    }
}
