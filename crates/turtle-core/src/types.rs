//! Remote target description, transfer bookkeeping and POSIX remote-path helpers.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ── RemoteTarget ─────────────────────────────────────────────────────

/// How the deploy user proves who they are.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Username + password, served over FTP(S).
    Password(SecretString),
    /// Path to a private key, served over SFTP.
    PrivateKey(PathBuf),
}

/// The server a run deploys to. Built once from the environment and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    /// Remote directory the local tree is mirrored into.
    pub remote_root: String,
}

impl RemoteTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The transport variant implied by the credential.
    pub fn transport_kind(&self) -> TransportKind {
        match self.credential {
            Credential::Password(_) => TransportKind::Ftp,
            Credential::PrivateKey(_) => TransportKind::Sftp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportKind {
    Ftp,
    Sftp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ftp => write!(f, "FTP"),
            Self::Sftp => write!(f, "SFTP"),
        }
    }
}

// ── Transfers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferKind {
    File,
    Directory,
}

/// One unit of work produced by a tree walk or a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub local: PathBuf,
    pub remote: String,
    pub kind: TransferKind,
}

/// Counters accumulated over one mirror run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorStats {
    pub directories_created: u64,
    pub directories_existing: u64,
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
}

impl MirrorStats {
    pub fn merge(&mut self, other: MirrorStats) {
        self.directories_created += other.directories_created;
        self.directories_existing += other.directories_existing;
        self.files_uploaded += other.files_uploaded;
        self.bytes_uploaded += other.bytes_uploaded;
    }
}

// ── Remote paths ─────────────────────────────────────────────────────

/// `true` for paths that always exist on the remote side: the filesystem
/// root and the login directory.
pub fn is_remote_root(path: &str) -> bool {
    matches!(path, "" | "/" | ".")
}

/// Join a child name onto a remote directory using `/` separators.
pub fn join_remote(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() || base == "." {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Parent directory of a remote path, or `None` when `path` is a root.
pub fn parent_remote(path: &str) -> Option<String> {
    if is_remote_root(path) {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => Some(String::new()),
    }
}
