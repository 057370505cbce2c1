// ── SFTP / SSH error type ───────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use std::fmt;
use turtle_core::DeployError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpError {
    pub kind: SftpErrorKind,
    pub message: String,
    /// libssh2 session code, SFTP status code, or remote exit status.
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SftpErrorKind {
    /// TCP / DNS failure.
    ConnectionFailed,
    /// SSH banner / key exchange failure.
    HandshakeFailed,
    /// Key unreadable, malformed, encrypted, or rejected by the server.
    AuthFailed,
    /// Could not open the SFTP subsystem or an exec channel.
    ChannelFailed,
    /// Remote command exited non-zero; `message` holds its stderr.
    CommandFailed,
    TransferFailed,
    NotFound,
    PermissionDenied,
    Timeout,
    /// Socket closed or reset underneath the session.
    Disconnected,
    /// Local file I/O.
    IoError,
}

pub type SftpResult<T> = Result<T, SftpError>;

// libssh2 session error codes (libssh2.h)
const LIBSSH2_ERROR_BANNER_RECV: i32 = -2;
const LIBSSH2_ERROR_BANNER_SEND: i32 = -3;
const LIBSSH2_ERROR_KEX_FAILURE: i32 = -5;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_KEY_EXCHANGE_FAILURE: i32 = -8;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -15;
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;
const LIBSSH2_ERROR_BAD_SOCKET: i32 = -45;

// SFTP status codes (draft-ietf-secsh-filexfer)
pub(crate) const SSH_FX_NO_SUCH_FILE: i32 = 2;
pub(crate) const SSH_FX_PERMISSION_DENIED: i32 = 3;
pub(crate) const SSH_FX_FAILURE: i32 = 4;
pub(crate) const SSH_FX_NO_CONNECTION: i32 = 6;
pub(crate) const SSH_FX_CONNECTION_LOST: i32 = 7;
pub(crate) const SSH_FX_FILE_ALREADY_EXISTS: i32 = 11;

impl SftpError {
    pub fn new(kind: SftpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::ConnectionFailed, msg)
    }

    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::HandshakeFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::AuthFailed, msg)
    }

    pub fn channel_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::ChannelFailed, msg)
    }

    pub fn command_failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::CommandFailed, stderr).with_code(exit_status)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Disconnected, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::IoError, msg)
    }

    /// Prefix the message with what we were doing.
    pub fn context(mut self, what: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", what, self.message);
        self
    }

    /// The SFTP status code, if this came from the SFTP subsystem.
    pub fn sftp_status(&self) -> Option<i32> {
        match self.kind {
            SftpErrorKind::NotFound => Some(SSH_FX_NO_SUCH_FILE),
            SftpErrorKind::PermissionDenied => Some(SSH_FX_PERMISSION_DENIED),
            SftpErrorKind::TransferFailed => self.code,
            _ => None,
        }
    }
}

impl fmt::Display for SftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[SFTP {:?} {}] {}", self.kind, code, self.message),
            None => write!(f, "[SFTP {:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SftpError {}

/// Classify a libssh2 session error code.
pub(crate) fn session_error_kind(code: i32) -> SftpErrorKind {
    match code {
        LIBSSH2_ERROR_SOCKET_SEND
        | LIBSSH2_ERROR_SOCKET_RECV
        | LIBSSH2_ERROR_SOCKET_DISCONNECT
        | LIBSSH2_ERROR_BAD_SOCKET => SftpErrorKind::Disconnected,
        LIBSSH2_ERROR_TIMEOUT | LIBSSH2_ERROR_SOCKET_TIMEOUT => SftpErrorKind::Timeout,
        LIBSSH2_ERROR_AUTHENTICATION_FAILED
        | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
        | LIBSSH2_ERROR_PASSWORD_EXPIRED
        | LIBSSH2_ERROR_FILE => SftpErrorKind::AuthFailed,
        LIBSSH2_ERROR_BANNER_RECV
        | LIBSSH2_ERROR_BANNER_SEND
        | LIBSSH2_ERROR_KEX_FAILURE
        | LIBSSH2_ERROR_KEY_EXCHANGE_FAILURE => SftpErrorKind::HandshakeFailed,
        _ => SftpErrorKind::ChannelFailed,
    }
}

/// Classify an SFTP status code.
pub(crate) fn sftp_status_kind(status: i32) -> SftpErrorKind {
    match status {
        SSH_FX_NO_SUCH_FILE => SftpErrorKind::NotFound,
        SSH_FX_PERMISSION_DENIED => SftpErrorKind::PermissionDenied,
        SSH_FX_NO_CONNECTION | SSH_FX_CONNECTION_LOST => SftpErrorKind::Disconnected,
        _ => SftpErrorKind::TransferFailed,
    }
}

impl From<ssh2::Error> for SftpError {
    fn from(e: ssh2::Error) -> Self {
        match e.code() {
            ssh2::ErrorCode::Session(code) => {
                Self::new(session_error_kind(code), e.message()).with_code(code)
            }
            ssh2::ErrorCode::SFTP(status) => {
                Self::new(sftp_status_kind(status), e.message()).with_code(status)
            }
        }
    }
}

impl From<std::io::Error> for SftpError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => Self::timeout(e.to_string()),
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => Self::disconnected(e.to_string()),
            _ => Self::io_error(e.to_string()),
        }
    }
}

impl From<SftpError> for DeployError {
    fn from(e: SftpError) -> Self {
        let msg = e.to_string();
        match e.kind {
            SftpErrorKind::ConnectionFailed | SftpErrorKind::HandshakeFailed => DeployError::network(msg),
            SftpErrorKind::AuthFailed => DeployError::auth(msg),
            SftpErrorKind::Timeout => DeployError::timeout(msg),
            SftpErrorKind::Disconnected => DeployError::disconnected(msg),
            SftpErrorKind::CommandFailed => DeployError::command(e.code.unwrap_or(-1), e.message),
            _ => DeployError::transfer(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turtle_core::DeployErrorKind;

    #[test]
    fn test_session_codes() {
        assert_eq!(session_error_kind(-13), SftpErrorKind::Disconnected);
        assert_eq!(session_error_kind(-43), SftpErrorKind::Disconnected);
        assert_eq!(session_error_kind(-30), SftpErrorKind::Timeout);
        assert_eq!(session_error_kind(-18), SftpErrorKind::AuthFailed);
        assert_eq!(session_error_kind(-8), SftpErrorKind::HandshakeFailed);
    }

    #[test]
    fn test_sftp_status_codes() {
        assert_eq!(sftp_status_kind(2), SftpErrorKind::NotFound);
        assert_eq!(sftp_status_kind(3), SftpErrorKind::PermissionDenied);
        assert_eq!(sftp_status_kind(7), SftpErrorKind::Disconnected);
        assert_eq!(sftp_status_kind(4), SftpErrorKind::TransferFailed);
    }

    #[test]
    fn test_command_failure_keeps_stderr() {
        let d: DeployError = SftpError::command_failed(1, "mkdir: Permission denied").into();
        assert_eq!(d.kind, DeployErrorKind::Command);
        assert_eq!(d.exit_code, Some(1));
        assert_eq!(d.stderr.as_deref(), Some("mkdir: Permission denied"));
    }

    #[test]
    fn test_deploy_mapping() {
        let d: DeployError = SftpError::auth_failed("key rejected").into();
        assert_eq!(d.kind, DeployErrorKind::Auth);
        let d: DeployError = SftpError::handshake_failed("kex").into();
        assert!(d.is_transient());
        let d: DeployError = SftpError::disconnected("eof").into();
        assert_eq!(d.kind, DeployErrorKind::Disconnected);
    }
}
