// ── File upload ──────────────────────────────────────────────────────────────

use crate::sftp::error::{SftpError, SftpResult};
use crate::sftp::service::SftpService;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;

impl SftpService {
    /// Copy one local file to `remote`, truncating whatever is there.
    pub async fn upload(&self, local: &Path, remote: &str) -> SftpResult<u64> {
        let local: PathBuf = local.to_path_buf();
        let remote = remote.to_string();
        self.blocking(move |s| {
            let file = std::fs::File::open(&local)
                .map_err(|e| SftpError::io_error(format!("Cannot read local file '{}': {}", local.display(), e)))?;
            let mut reader = BufReader::with_capacity(64 * 1024, file);

            let mut remote_file = s
                .sftp
                .create(Path::new(&remote))
                .map_err(|e| SftpError::from(e).context(format!("Cannot create '{}'", remote)))?;
            let bytes = std::io::copy(&mut reader, &mut remote_file)
                .map_err(|e| SftpError::from(e).context(format!("Upload to '{}' failed", remote)))?;
            remote_file.flush()?;

            s.info.files_uploaded += 1;
            s.info.bytes_uploaded += bytes;
            info!("Uploaded {} -> {} ({} bytes)", local.display(), remote, bytes);
            Ok(bytes)
        })
        .await
    }
}
