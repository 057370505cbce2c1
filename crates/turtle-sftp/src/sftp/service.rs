// ── SFTP session service ─────────────────────────────────────────────────────
//
// Owns one authenticated libssh2 session plus its SFTP channel. Every
// operation runs on the blocking pool while holding the session mutex, so
// calls are serialized the same way a single SSH channel would force anyway.

use crate::sftp::error::{SftpError, SftpErrorKind, SftpResult};
use crate::sftp::keys;
use crate::sftp::types::{SftpConnectionConfig, SftpSessionInfo};
use ssh2::{Session, Sftp};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SftpSession {
    pub(crate) session: Session,
    pub(crate) sftp: Sftp,
    _tcp: TcpStream,
    pub info: SftpSessionInfo,
}

#[derive(Clone)]
pub struct SftpService {
    id: String,
    inner: Arc<Mutex<SftpSession>>,
}

impl SftpService {
    // ── Connect ──────────────────────────────────────────────────────────────

    /// Validate the key, then connect, handshake and authenticate. The whole
    /// sequence is bounded by `timeout_secs`.
    pub async fn connect(config: SftpConnectionConfig) -> SftpResult<Self> {
        keys::load_private_key(&config.private_key)?;

        let deadline = Duration::from_secs(config.timeout_secs.max(1));
        let addr = config.address();
        let task = tokio::task::spawn_blocking(move || open_session(&config));
        let session = tokio::time::timeout(deadline, task)
            .await
            .map_err(|_| SftpError::timeout(format!("SSH connect to {} did not complete within {:?}", addr, deadline)))?
            .map_err(|e| SftpError::channel_failed(format!("connect task failed: {}", e)))??;

        Ok(Self {
            id: session.info.id.clone(),
            inner: Arc::new(Mutex::new(session)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `f` against the session on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> SftpResult<T>
    where
        F: FnOnce(&mut SftpSession) -> SftpResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| SftpError::channel_failed("SFTP session lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| SftpError::channel_failed(format!("blocking task failed: {}", e)))?
    }

    // ── Keepalive / disconnect ───────────────────────────────────────────────

    pub async fn ping(&self) -> SftpResult<()> {
        self.blocking(|s| {
            s.session.keepalive_send()?;
            Ok(())
        })
        .await
    }

    /// Send SSH_MSG_DISCONNECT. A peer that already went away is only logged.
    pub async fn disconnect(&self) -> SftpResult<()> {
        self.blocking(|s| {
            if let Err(e) = s.session.disconnect(None, "Client disconnecting", None) {
                debug!("SSH disconnect on {}: {}", s.info.id, e);
            }
            info!(
                "SFTP session {} closed after {}s ({} files, {} bytes, {} commands)",
                s.info.id,
                s.info.connected_at.elapsed().as_secs(),
                s.info.files_uploaded,
                s.info.bytes_uploaded,
                s.info.commands_run
            );
            Ok(())
        })
        .await
    }
}

fn connect_tcp(config: &SftpConnectionConfig, timeout: Duration) -> SftpResult<TcpStream> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| SftpError::connection_failed(format!("Cannot resolve {}: {}", config.host, e)))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => {
                debug!("TCP connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => SftpError::connection_failed(format!("TCP connection to {} failed: {}", config.address(), e)),
        None => SftpError::connection_failed(format!("{} resolved to no addresses", config.host)),
    })
}

fn open_session(config: &SftpConnectionConfig) -> SftpResult<SftpSession> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    info!("SFTP connecting to {}", config.address());

    let tcp = connect_tcp(config, timeout)?;
    let mut session = Session::new().map_err(|e| SftpError::from(e).context("Failed to create SSH session"))?;
    session.set_timeout(timeout.as_millis() as u32);
    session.set_tcp_stream(tcp.try_clone()?);
    session.handshake().map_err(|e| {
        let err = SftpError::from(e);
        match err.kind {
            SftpErrorKind::Timeout | SftpErrorKind::Disconnected => err,
            _ => SftpError::handshake_failed(err.message),
        }
        .context("SSH handshake failed")
    })?;
    let banner = session.banner().map(|b| b.to_string());

    session
        .userauth_pubkey_file(&config.username, None, &config.private_key, None)
        .map_err(|e| SftpError::auth_failed(format!("Public key authentication failed: {}", e)))?;
    if !session.authenticated() {
        return Err(SftpError::auth_failed("Authentication failed: not authenticated after auth attempt"));
    }
    info!("SFTP authenticated to {} as {}", config.address(), config.username);

    let keepalive = config.keepalive_interval_secs;
    session.set_keepalive(keepalive > 0, keepalive as u32);

    let sftp = session.sftp().map_err(|e| {
        warn!("SFTP subsystem unavailable on {}: {}", config.address(), e);
        SftpError::channel_failed(format!("SFTP channel error: {}", e))
    })?;

    let info = SftpSessionInfo {
        id: Uuid::new_v4().to_string(),
        host: config.host.clone(),
        port: config.port,
        username: config.username.clone(),
        server_banner: banner,
        connected_at: Instant::now(),
        files_uploaded: 0,
        bytes_uploaded: 0,
        commands_run: 0,
    };
    Ok(SftpSession {
        session,
        sftp,
        _tcp: tcp,
        info,
    })
}
