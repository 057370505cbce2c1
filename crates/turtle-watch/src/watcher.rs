//! Recursive directory watcher bridging `notify` callbacks into tokio.

use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WatchError {
    pub message: String,
    pub path: Option<PathBuf>,
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "{} ({})", self.message, p.display()),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        Self {
            path: e.paths.first().cloned(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// New or modified content; the only kind that triggers work.
    Change,
    Rename,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: ChangeKind,
    /// Root-relative, `/`-separated.
    pub key: String,
    pub path: PathBuf,
}

pub fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Change),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Change),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Debounce key for `path` under `root`. Editor backup files (`foo~`) and
/// the root itself have no key.
pub fn watch_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let key = parts.join("/");
    if key.is_empty() || key.ends_with('~') {
        return None;
    }
    Some(key)
}

pub struct TreeWatcher {
    root: PathBuf,
    /// Canonical form of `root`; some backends report resolved paths.
    canonical_root: PathBuf,
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    queued: VecDeque<FsEvent>,
}

impl TreeWatcher {
    pub fn start(root: &Path) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError {
                message: "Watch root is not a directory".into(),
                path: Some(root.to_path_buf()),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        debug!("Watching {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            canonical_root,
            _watcher: watcher,
            rx,
            queued: VecDeque::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next relevant event, or `None` once the backend has shut down.
    pub async fn next(&mut self) -> Option<FsEvent> {
        loop {
            if let Some(ev) = self.queued.pop_front() {
                return Some(ev);
            }
            match self.rx.recv().await? {
                Ok(event) => self.enqueue(event),
                Err(e) => warn!("Watcher error under {}: {}", self.root.display(), e),
            }
        }
    }

    fn enqueue(&mut self, event: Event) {
        let Some(kind) = classify(&event.kind) else {
            return;
        };
        for path in event.paths {
            let key = watch_key(&self.root, &path).or_else(|| watch_key(&self.canonical_root, &path));
            if let Some(key) = key {
                let local = self.root.join(&key);
                self.queued.push_back(FsEvent { kind, key, path: local });
            }
        }
    }
}
