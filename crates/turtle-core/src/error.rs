//! Deploy-wide error type shared by the transports, the mirror engine and
//! the task runners.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised deploy error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployError {
    pub kind: DeployErrorKind,
    pub message: String,
    /// Local or remote path the failure relates to, if any.
    pub path: Option<String>,
    /// Exit status of a failed remote command or build step.
    pub exit_code: Option<i32>,
    /// Captured standard error of a failed command.
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeployErrorKind {
    /// Missing or invalid environment value.
    Config,
    /// Bad credentials or an unusable private key.
    Auth,
    /// TCP / DNS / handshake failure.
    Network,
    /// Operation exceeded its deadline.
    Timeout,
    /// Local filesystem inconsistency while walking a tree.
    Walk,
    /// A single upload or mkdir failed.
    Transfer,
    /// Remote command exited non-zero.
    Command,
    /// External build step failed.
    Build,
    /// The remote side tore the connection down.
    Disconnected,
    /// The transport does not offer the requested operation.
    Unsupported,
}

pub type DeployResult<T> = Result<T, DeployError>;

// ── Construction helpers ─────────────────────────────────────────────

impl DeployError {
    pub fn new(kind: DeployErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            path: None,
            exit_code: None,
            stderr: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Config, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Auth, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Network, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Timeout, msg)
    }

    pub fn walk(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Walk, msg)
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Transfer, msg)
    }

    pub fn command(exit_code: i32, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        let mut err = Self::new(
            DeployErrorKind::Command,
            format!("Remote command exited with status {}", exit_code),
        );
        err.exit_code = Some(exit_code);
        err.stderr = Some(stderr);
        err
    }

    pub fn build(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Build, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Disconnected, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Unsupported, msg)
    }

    /// Failures that a fresh connection attempt may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DeployErrorKind::Network | DeployErrorKind::Timeout | DeployErrorKind::Disconnected
        )
    }

    /// Whether a watch session must stop on this error. Everything except a
    /// configuration problem is confined to the trigger that raised it.
    pub fn is_fatal_for_watch(&self) -> bool {
        self.kind == DeployErrorKind::Config
    }
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(path) = &self.path {
            write!(f, " ({})", path)?;
        }
        if let Some(stderr) = self.stderr.as_deref().map(str::trim) {
            if !stderr.is_empty() {
                write!(f, ": {}", stderr)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for DeployError {}

impl From<std::io::Error> for DeployError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::walk(e.to_string())
        }
    }
}

// ── Mkdir outcome ────────────────────────────────────────────────────

/// Structured result of a failed remote mkdir, classified by the transport.
#[derive(Debug, Clone)]
pub enum MkdirError {
    /// The directory is already there.
    AlreadyExists,
    /// An intermediate directory of the path does not exist.
    MissingParent,
    /// Anything else; aborts the walk.
    Failed(DeployError),
}

impl fmt::Display for MkdirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "directory already exists"),
            Self::MissingParent => write!(f, "parent directory is missing"),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl From<DeployError> for MkdirError {
    fn from(e: DeployError) -> Self {
        Self::Failed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(DeployError::network("x").is_transient());
        assert!(DeployError::timeout("x").is_transient());
        assert!(DeployError::disconnected("x").is_transient());
        assert!(!DeployError::auth("x").is_transient());
        assert!(!DeployError::transfer("x").is_transient());
    }

    #[test]
    fn only_config_stops_a_watch() {
        assert!(DeployError::config("x").is_fatal_for_watch());
        assert!(!DeployError::auth("x").is_fatal_for_watch());
        assert!(!DeployError::walk("x").is_fatal_for_watch());
    }

    #[test]
    fn command_error_carries_stderr() {
        let e = DeployError::command(2, "mkdir: cannot create directory\n");
        assert_eq!(e.kind, DeployErrorKind::Command);
        assert_eq!(e.exit_code, Some(2));
        let shown = e.to_string();
        assert!(shown.contains("status 2"));
        assert!(shown.ends_with("mkdir: cannot create directory"));
    }

    #[test]
    fn io_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(DeployError::from(io).kind, DeployErrorKind::Timeout);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(DeployError::from(io).kind, DeployErrorKind::Walk);
    }
}
