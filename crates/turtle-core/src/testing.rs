//! In-memory transport that records every call, for exercising the mirror
//! engine and lifecycle manager without a server.

use crate::error::{DeployError, DeployResult, MkdirError};
use crate::transport::{ClosedFlag, Connector, Transport};
use crate::types::{is_remote_root, parent_remote, RemoteTarget, TransportKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mkdir(String),
    Upload { local: PathBuf, remote: String },
    Exec(String),
    Keepalive,
    Close,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    failing_mkdirs: HashMap<String, DeployError>,
    failing_uploads: HashMap<String, DeployError>,
    exec_results: HashMap<String, DeployResult<String>>,
    strict_parents: bool,
    closes: usize,
}

/// Cloning shares the recorded state, so a test can keep a handle while the
/// transport itself is boxed and handed to a `Connection`.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<State>>,
    closed: Option<ClosedFlag>,
    upload_delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make mkdir report `MissingParent` unless the parent already exists.
    pub fn strict_parents(self) -> Self {
        self.lock().strict_parents = true;
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.lock().dirs.insert(path.to_string());
        self
    }

    pub fn fail_mkdir(self, path: &str, err: DeployError) -> Self {
        self.lock().failing_mkdirs.insert(path.to_string(), err);
        self
    }

    pub fn fail_upload(self, remote: &str, err: DeployError) -> Self {
        self.lock().failing_uploads.insert(remote.to_string(), err);
        self
    }

    pub fn exec_result(self, command: &str, result: DeployResult<String>) -> Self {
        self.lock().exec_results.insert(command.to_string(), result);
        self
    }

    /// Keep each upload in flight for `delay`, to widen race windows.
    pub fn slow_uploads(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn bind(mut self, closed: ClosedFlag) -> Self {
        self.closed = Some(closed);
        self
    }

    /// Simulate the server dropping the connection.
    pub fn drop_remote(&self) {
        if let Some(flag) = &self.closed {
            flag.mark();
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Upload { remote, .. } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn file(&self, remote: &str) -> Option<Vec<u8>> {
        self.lock().files.get(remote).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
    }

    async fn mkdir(&mut self, remote: &str) -> Result<(), MkdirError> {
        let mut state = self.lock();
        state.calls.push(Call::Mkdir(remote.to_string()));
        if let Some(err) = state.failing_mkdirs.get(remote) {
            return Err(MkdirError::Failed(err.clone()));
        }
        if state.dirs.contains(remote) {
            return Err(MkdirError::AlreadyExists);
        }
        if state.strict_parents {
            let parent_ok = parent_remote(remote)
                .map(|p| is_remote_root(&p) || state.dirs.contains(&p))
                .unwrap_or(true);
            if !parent_ok {
                return Err(MkdirError::MissingParent);
            }
        }
        state.dirs.insert(remote.to_string());
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, remote: &str) -> DeployResult<u64> {
        {
            let mut state = self.lock();
            state.calls.push(Call::Upload {
                local: local.to_path_buf(),
                remote: remote.to_string(),
            });
            if let Some(err) = state.failing_uploads.get(remote) {
                return Err(err.clone());
            }
        }
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        let data = tokio::fs::read(local).await?;
        let len = data.len() as u64;
        self.lock().files.insert(remote.to_string(), data);
        Ok(len)
    }

    async fn exec(&mut self, command: &str) -> DeployResult<String> {
        let mut state = self.lock();
        state.calls.push(Call::Exec(command.to_string()));
        state
            .exec_results
            .get(command)
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }

    async fn keepalive(&mut self) -> DeployResult<()> {
        self.lock().calls.push(Call::Keepalive);
        Ok(())
    }

    async fn close(&mut self) -> DeployResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.calls.push(Call::Close);
        state.closes += 1;
        Ok(())
    }
}

// ─── Connector ───────────────────────────────────────────────────────

/// Hands out clones of one `RecordingTransport`, optionally failing the
/// first few attempts.
#[derive(Clone)]
pub struct RecordingConnector {
    template: RecordingTransport,
    attempts: Arc<AtomicUsize>,
    failures: Arc<Mutex<Vec<DeployError>>>,
    last: Arc<Mutex<Option<RecordingTransport>>>,
}

impl RecordingConnector {
    pub fn new(template: RecordingTransport) -> Self {
        Self {
            template,
            attempts: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(Vec::new())),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue errors returned by the next connect attempts, in order.
    pub fn failing_with(self, errors: Vec<DeployError>) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            *failures = errors;
        }
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The transport handed out by the most recent successful connect.
    pub fn last(&self) -> Option<RecordingTransport> {
        self.last.lock().ok().and_then(|l| l.clone())
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(
        &self,
        _target: &RemoteTarget,
        closed: ClosedFlag,
    ) -> DeployResult<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| if f.is_empty() { None } else { Some(f.remove(0)) });
        if let Some(err) = queued {
            return Err(err);
        }
        let transport = self.template.clone().bind(closed);
        if let Ok(mut last) = self.last.lock() {
            *last = Some(transport.clone());
        }
        Ok(Box::new(transport))
    }
}
