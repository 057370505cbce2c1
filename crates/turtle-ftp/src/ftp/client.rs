//! Stateful FTP client: owns the control connection and the session info.
//!
//! Login sequence: connect → (AUTH TLS → PBSZ 0 → PROT P) → USER/PASS →
//! FEAT → OPTS UTF8 → SYST → PWD → TYPE I.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataChannelParams, PendingData};
use crate::ftp::types::*;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub struct FtpClient {
    pub id: String,
    pub codec: FtpCodec,
    pub config: FtpConnectionConfig,
    pub info: FtpSessionInfo,
    pub features: ServerFeatures,
}

impl FtpClient {
    /// Open and authenticate a session. The whole sequence runs under the
    /// configured connect timeout.
    pub async fn connect(config: FtpConnectionConfig) -> FtpResult<Self> {
        if config.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        let deadline = Duration::from_secs(config.options.connect_timeout_sec);
        tokio::time::timeout(deadline, Self::login(config))
            .await
            .map_err(|_| FtpError::timeout(format!("FTP login did not complete within {:?}", deadline)))?
    }

    async fn login(config: FtpConnectionConfig) -> FtpResult<Self> {
        let session_id = Uuid::new_v4().to_string();
        let (mut codec, banner) = connection::connect(&config).await?;

        // ── Explicit FTPS ───────────────────────────────────────
        if config.options.security == FtpSecurityMode::Explicit {
            let resp = codec.execute("AUTH TLS").await?;
            if !resp.is_success() {
                return Err(FtpError::tls_failed(format!("AUTH TLS rejected: {}", resp.text()))
                    .with_code(resp.code));
            }
            codec = tls::upgrade_to_tls(codec, &config.host, config.options.accept_invalid_certs).await?;
        }
        if config.options.security.is_secure() {
            codec.expect_ok("PBSZ 0").await?;
            codec.expect_ok("PROT P").await?;
        }

        // ── USER / PASS ─────────────────────────────────────────
        let user = codec.execute(&format!("USER {}", config.username)).await?;
        if user.is_intermediate() {
            let pass = codec
                .execute(&format!("PASS {}", config.password.expose_secret()))
                .await?;
            if !pass.is_success() {
                return Err(FtpError::auth_failed(format!("Login failed: {}", pass.text())).with_code(pass.code));
            }
        } else if !user.is_success() {
            return Err(FtpError::auth_failed(format!("USER rejected: {}", user.text())).with_code(user.code));
        }

        let features = match codec.execute("FEAT").await {
            Ok(resp) if resp.is_success() => ServerFeatures::from_feat(&resp),
            Ok(_) => ServerFeatures::default(),
            Err(e) if e.kind == crate::ftp::error::FtpErrorKind::Disconnected => return Err(e),
            Err(_) => ServerFeatures::default(),
        };
        if config.options.utf8 && features.utf8 {
            codec.execute("OPTS UTF8 ON").await?;
        }

        let system_type = match codec.execute("SYST").await? {
            r if r.is_success() => Some(r.text()),
            _ => None,
        };
        let cwd = match codec.execute("PWD").await? {
            r if r.is_success() => parse_pwd(&r.text()).unwrap_or_else(|_| "/".into()),
            _ => "/".into(),
        };
        codec.expect_ok("TYPE I").await?;

        info!(
            "FTP session {} logged in to {}:{} as {} ({:?}, system {})",
            session_id,
            config.host,
            config.port,
            config.username,
            config.options.security,
            system_type.as_deref().unwrap_or("unknown")
        );

        let now = Utc::now();
        let info = FtpSessionInfo {
            id: session_id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            security: config.options.security,
            server_banner: Some(banner.text()),
            system_type,
            current_directory: cwd,
            connected_at: now,
            last_activity: now,
            files_uploaded: 0,
            bytes_uploaded: 0,
        };

        Ok(Self {
            id: session_id,
            codec,
            config,
            info,
            features,
        })
    }

    pub(crate) fn touch(&mut self) {
        self.info.last_activity = Utc::now();
    }

    /// `true` when the server reports a UNIX-like system type.
    pub fn is_unix(&self) -> bool {
        self.info
            .system_type
            .as_deref()
            .map_or(false, |s| s.to_ascii_uppercase().starts_with("UNIX"))
    }

    // ─── Keepalive / QUIT ────────────────────────────────────────

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("NOOP").await?;
        self.touch();
        Ok(())
    }

    /// Say goodbye. A server that already hung up is not an error.
    pub async fn quit(&mut self) -> FtpResult<()> {
        match self.codec.execute("QUIT").await {
            Ok(_) => {}
            Err(e) => debug!("QUIT on {}: {}", self.id, e),
        }
        let uptime = Utc::now() - self.info.connected_at;
        info!(
            "FTP session {} closed after {}s ({} files, {} bytes)",
            self.id,
            uptime.num_seconds(),
            self.info.files_uploaded,
            self.info.bytes_uploaded
        );
        Ok(())
    }

    // ─── PWD / CWD / CDUP ───────────────────────────────────────

    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.codec.expect_ok("PWD").await?;
        parse_pwd(&resp.text())
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("CWD {}", path)).await?;
        self.info.current_directory = self.pwd().await.unwrap_or_else(|_| path.to_string());
        self.touch();
        Ok(())
    }

    pub async fn cdup(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("CDUP").await?;
        self.info.current_directory = self.pwd().await?;
        self.touch();
        Ok(())
    }

    // ─── Data channel ────────────────────────────────────────────

    pub(crate) async fn open_data_channel(&mut self) -> FtpResult<PendingData> {
        let mode = self.config.options.data_channel_mode.unwrap_or(if self.features.epsv {
            DataChannelMode::ExtendedPassive
        } else {
            DataChannelMode::Passive
        });
        transfer::open_data_channel(
            &mut self.codec,
            DataChannelParams {
                mode,
                host: &self.config.host,
                secure: self.config.options.security.is_secure(),
                accept_invalid_certs: self.config.options.accept_invalid_certs,
                timeout: Duration::from_secs(self.config.options.data_timeout_sec),
            },
        )
        .await
    }
}

/// Extract the quoted directory from a `257 "/path" ...` reply.
pub(crate) fn parse_pwd(text: &str) -> FtpResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))?;
    let rest = &text[start + 1..];
    // "" inside the quotes escapes a literal quote (RFC 959 appendix II)
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
            } else {
                return Ok(out);
            }
        } else {
            out.push(c);
        }
    }
    Err(FtpError::protocol_error(format!("Unterminated PWD reply: {}", text)))
}
