//! File uploads (STOR).

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, warn};

const CHUNK: usize = 64 * 1024;

impl FtpClient {
    /// Upload `local` to `remote` (absolute or relative to the working
    /// directory) and return the byte count.
    pub async fn store(&mut self, local: &Path, remote: &str) -> FtpResult<u64> {
        let mut file = fs::File::open(local)
            .await
            .map_err(|e| FtpError::io_error(format!("Cannot open {}: {}", local.display(), e)))?;

        let pending = self.open_data_channel().await?;
        let target = pending.target();
        let resp = self.codec.execute(&format!("STOR {}", remote)).await?;
        if !resp.is_preliminary() && !resp.is_success() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let mut data = match pending.activate().await {
            Ok(data) => data,
            Err(e) => {
                warn!("STOR {} via {}: {}", remote, target, e);
                if resp.is_preliminary() {
                    self.settle_aborted_transfer().await?;
                }
                return Err(e);
            }
        };

        let mut buf = vec![0u8; CHUNK];
        let mut sent: u64 = 0;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| FtpError::io_error(format!("Reading {}: {}", local.display(), e)))?;
            if n == 0 {
                break;
            }
            data.write_all(&buf[..n]).await?;
            sent += n as u64;
        }
        data.finish().await?;

        // 226 once the server has the whole file; a 150 opener means the
        // completion reply is still to come.
        if resp.is_preliminary() {
            let done = self.codec.read_response().await?;
            if !done.is_success() {
                return Err(FtpError::from_reply(done.code, &done.text()));
            }
        }

        debug!("STOR {} complete ({} bytes)", remote, sent);
        self.info.files_uploaded += 1;
        self.info.bytes_uploaded += sent;
        self.touch();
        Ok(sent)
    }

    /// After a 1xx opener the server still owes a completion reply. Consume
    /// it so the next command is not answered with a stale one; a server
    /// that never sends it leaves the session unusable.
    async fn settle_aborted_transfer(&mut self) -> FtpResult<()> {
        let wait = Duration::from_secs(self.config.options.data_timeout_sec);
        match timeout(wait, self.codec.read_response()).await {
            Ok(reply) => {
                let reply = reply?;
                debug!("Aborted transfer settled with {} {}", reply.code, reply.text());
                Ok(())
            }
            Err(_) => Err(FtpError::disconnected("No reply after an aborted data transfer")),
        }
    }
}
