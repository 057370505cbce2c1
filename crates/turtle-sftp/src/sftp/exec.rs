// ── Remote command execution ─────────────────────────────────────────────────

use crate::sftp::error::{SftpError, SftpResult};
use crate::sftp::service::SftpService;
use std::io::{self, ErrorKind, Read};
use std::time::Duration;
use tracing::debug;

const IDLE_POLL: Duration = Duration::from_millis(5);

impl SftpService {
    /// Run `command` through the remote shell and return its trimmed stdout.
    /// A non-zero exit status becomes `CommandFailed` carrying stderr.
    pub async fn exec(&self, command: &str) -> SftpResult<String> {
        let command = command.to_string();
        self.blocking(move |s| {
            let mut channel = s
                .session
                .channel_session()
                .map_err(|e| SftpError::from(e).context("Failed to open channel"))?;
            channel
                .exec(&command)
                .map_err(|e| SftpError::from(e).context(format!("Failed to execute command '{}'", command)))?;

            // Both streams share one channel window: drain them together so
            // a chatty stderr cannot stall the command.
            s.session.set_blocking(false);
            let drained = drain_output(channel.stream(0), channel.stderr(), || std::thread::sleep(IDLE_POLL));
            s.session.set_blocking(true);
            let (stdout, stderr) = drained?;
            channel.wait_close()?;
            let status = channel.exit_status()?;
            s.info.commands_run += 1;

            debug!("exec `{}` -> {}", command, status);
            if status != 0 {
                return Err(SftpError::command_failed(status, stderr.trim()));
            }
            Ok(stdout.trim().to_string())
        })
        .await
    }
}

/// Read two non-blocking streams to EOF in turns, calling `idle` whenever
/// neither had data.
fn drain_output<O: Read, E: Read>(mut out: O, mut err: E, mut idle: impl FnMut()) -> io::Result<(String, String)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 32768];
    let (mut out_done, mut err_done) = (false, false);

    while !(out_done && err_done) {
        let mut progressed = false;
        if !out_done {
            match out.read(&mut buf) {
                Ok(0) => out_done = true,
                Ok(n) => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if !err_done {
            match err.read(&mut buf) {
                Ok(0) => err_done = true,
                Ok(n) => {
                    stderr.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if !progressed {
            idle();
        }
    }
    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
