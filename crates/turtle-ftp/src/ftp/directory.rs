//! Directory operations: MKD with outcome classification, CWD probing and
//! the relative-path helpers used by the change-directory tree upload.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use tracing::debug;
use turtle_core::{is_remote_root, parent_remote, DeployError, MkdirError};

/// What the reply text alone says about a failed MKD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MkdHint {
    Exists,
    MissingParent,
    Unknown,
}

/// Servers word these replies differently; check the "missing" phrasings
/// first since several of them contain "exist".
pub(crate) fn classify_mkd_text(text: &str) -> MkdHint {
    let lower = text.to_lowercase();
    const MISSING: [&str; 5] = ["no such", "not found", "does not exist", "doesn't exist", "cannot find"];
    if MISSING.iter().any(|m| lower.contains(m)) {
        MkdHint::MissingParent
    } else if lower.contains("exist") {
        MkdHint::Exists
    } else {
        MkdHint::Unknown
    }
}

impl FtpClient {
    // ─── MKD ─────────────────────────────────────────────────────

    /// Create one directory, classifying failures into the mirror engine's
    /// outcomes. Ambiguous replies are resolved by probing with CWD.
    pub async fn make_dir(&mut self, path: &str) -> Result<(), MkdirError> {
        let resp = self
            .codec
            .execute(&format!("MKD {}", path))
            .await
            .map_err(DeployError::from)?;
        self.touch();
        if resp.is_success() {
            return Ok(());
        }

        let text = resp.text();
        match classify_mkd_text(&text) {
            MkdHint::Exists => return Err(MkdirError::AlreadyExists),
            MkdHint::MissingParent => return Err(MkdirError::MissingParent),
            MkdHint::Unknown => {}
        }

        debug!("MKD {} -> {} {}; probing", path, resp.code, text);
        if self.dir_exists(path).await.map_err(DeployError::from)? {
            return Err(MkdirError::AlreadyExists);
        }
        if let Some(parent) = parent_remote(path).filter(|p| !is_remote_root(p)) {
            if !self.dir_exists(&parent).await.map_err(DeployError::from)? {
                return Err(MkdirError::MissingParent);
            }
        }
        Err(MkdirError::Failed(
            DeployError::from(FtpError::from_reply(resp.code, &text)).with_path(path),
        ))
    }

    /// Whether `path` is an existing directory. The working directory is
    /// restored afterwards.
    pub async fn dir_exists(&mut self, path: &str) -> FtpResult<bool> {
        let previous = self.info.current_directory.clone();
        let resp = self.codec.execute(&format!("CWD {}", path)).await?;
        if !resp.is_success() {
            return Ok(false);
        }
        self.codec.expect_ok(&format!("CWD {}", previous)).await?;
        Ok(true)
    }

    // ─── Relative navigation ─────────────────────────────────────

    /// `MKD name` in the current directory. `Ok(true)` if it was created,
    /// `Ok(false)` if it was already there.
    pub async fn make_dir_here(&mut self, name: &str) -> FtpResult<bool> {
        let resp = self.codec.execute(&format!("MKD {}", name)).await?;
        if resp.is_success() {
            return Ok(true);
        }
        if classify_mkd_text(&resp.text()) == MkdHint::Exists {
            return Ok(false);
        }
        // No wording to go on: if we can enter it, it exists.
        let entered = self.codec.execute(&format!("CWD {}", name)).await?;
        if entered.is_success() {
            self.codec.expect_ok("CDUP").await?;
            return Ok(false);
        }
        Err(FtpError::from_reply(resp.code, &resp.text()))
    }

    /// Make sure every component of `path` exists, then enter it.
    pub async fn enter_dir_creating(&mut self, path: &str) -> FtpResult<()> {
        if path.starts_with('/') {
            self.cwd("/").await?;
        }
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            self.make_dir_here(component).await?;
            self.cwd(component).await.map_err(|e| match e.kind {
                FtpErrorKind::Disconnected | FtpErrorKind::Timeout => e,
                _ => FtpError::transfer_failed(format!("Cannot enter {}: {}", component, e.message)),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkd_text_classification() {
        assert_eq!(classify_mkd_text("Create directory operation failed: File exists"), MkdHint::Exists);
        assert_eq!(classify_mkd_text("\"/www\": Directory already exists"), MkdHint::Exists);
        assert_eq!(classify_mkd_text("/a/b: No such file or directory"), MkdHint::MissingParent);
        assert_eq!(classify_mkd_text("Parent directory does not exist"), MkdHint::MissingParent);
        assert_eq!(classify_mkd_text("Can't create directory."), MkdHint::Unknown);
        assert_eq!(classify_mkd_text("Permission denied"), MkdHint::Unknown);
    }
}
