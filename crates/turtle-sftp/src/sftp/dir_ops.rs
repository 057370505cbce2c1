// ── Directory operations ─────────────────────────────────────────────────────

use crate::sftp::error::{SftpError, SSH_FX_FAILURE, SSH_FX_FILE_ALREADY_EXISTS, SSH_FX_NO_SUCH_FILE};
use crate::sftp::service::{SftpService, SftpSession};
use std::path::Path;
use tracing::{debug, info};
use turtle_core::{is_remote_root, parent_remote, DeployError, MkdirError};

const DIR_MODE: i32 = 0o755;

/// Map a failed SFTP mkdir onto the mirror engine's outcomes.
///
/// OpenSSH answers both "exists" and "no parent" with the generic
/// SSH_FX_FAILURE, so that status is disambiguated with stat probes.
pub(crate) fn classify_mkdir_failure(
    status: Option<i32>,
    is_dir: impl Fn() -> bool,
    parent_exists: impl Fn() -> bool,
) -> Option<MkdirError> {
    match status {
        Some(SSH_FX_FILE_ALREADY_EXISTS) => Some(MkdirError::AlreadyExists),
        Some(SSH_FX_NO_SUCH_FILE) => Some(MkdirError::MissingParent),
        Some(SSH_FX_FAILURE) if is_dir() => Some(MkdirError::AlreadyExists),
        Some(SSH_FX_FAILURE) if !parent_exists() => Some(MkdirError::MissingParent),
        _ => None,
    }
}

impl SftpSession {
    pub(crate) fn is_dir(&self, path: &str) -> bool {
        self.sftp.stat(Path::new(path)).map(|st| st.is_dir()).unwrap_or(false)
    }

    pub(crate) fn make_dir(&mut self, path: &str) -> Result<(), MkdirError> {
        let err = match self.sftp.mkdir(Path::new(path), DIR_MODE) {
            Ok(()) => {
                info!("SFTP mkdir: {}", path);
                return Ok(());
            }
            Err(e) => SftpError::from(e),
        };

        let parent = parent_remote(path);
        let outcome = classify_mkdir_failure(
            err.sftp_status(),
            || self.is_dir(path),
            || match parent.as_deref() {
                Some(p) if !is_remote_root(p) => self.is_dir(p),
                _ => true,
            },
        );
        match outcome {
            Some(o) => {
                debug!("SFTP mkdir {}: {} -> {}", path, err, o);
                Err(o)
            }
            None => Err(MkdirError::Failed(
                DeployError::from(err.context(format!("mkdir '{}' failed", path))).with_path(path),
            )),
        }
    }
}

impl SftpService {
    pub async fn mkdir(&self, path: &str) -> Result<(), MkdirError> {
        let path = path.to_string();
        match self.blocking(move |s| Ok(s.make_dir(&path))).await {
            Ok(result) => result,
            Err(e) => Err(MkdirError::Failed(e.into())),
        }
    }
}
