//! Shared types for the FTP crate.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ftp::error::FtpError;

// ─── Connection ──────────────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FtpSecurityMode {
    /// Plain-text FTP.
    None,
    /// Starts plain then upgrades via AUTH TLS.
    #[default]
    Explicit,
    /// TLS from the first byte.
    Implicit,
}

impl FtpSecurityMode {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Implicit => 990,
            _ => 21,
        }
    }

    pub fn is_secure(&self) -> bool {
        *self != Self::None
    }
}

impl FromStr for FtpSecurityMode {
    type Err = FtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "plain" | "off" => Ok(Self::None),
            "explicit" | "ftpes" | "" => Ok(Self::Explicit),
            "implicit" | "ftps" => Ok(Self::Implicit),
            other => Err(FtpError::invalid_config(format!(
                "Unknown FTP security mode '{}' (expected explicit, implicit or none)",
                other
            ))),
        }
    }
}

/// Passive data-channel flavour. `None` in `FtpOptions` picks EPSV when the
/// server advertises it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
}

/// How `upload_tree` reproduces directories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TreeUploadMode {
    /// Decide from FEAT / SYST after login.
    #[default]
    Auto,
    /// Absolute paths through the shared mirror engine.
    Mirror,
    /// `MKD name` / `CWD name` / upload children / `CDUP`.
    ChangeDirectory,
}

/// Tunables for an FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpOptions {
    #[serde(default)]
    pub security: FtpSecurityMode,
    #[serde(default)]
    pub data_channel_mode: Option<DataChannelMode>,
    #[serde(default)]
    pub tree_mode: TreeUploadMode,
    /// Connection + login deadline in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// Data-channel connect deadline in seconds.
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
    /// Accept self-signed / mismatched certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Send `OPTS UTF8 ON` when the server supports it.
    #[serde(default = "default_true")]
    pub utf8: bool,
}

fn default_connect_timeout() -> u64 {
    20
}
fn default_data_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for FtpOptions {
    fn default() -> Self {
        Self {
            security: FtpSecurityMode::default(),
            data_channel_mode: None,
            tree_mode: TreeUploadMode::default(),
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
            accept_invalid_certs: false,
            utf8: true,
        }
    }
}

/// Everything needed to open one FTP session.
#[derive(Debug, Clone)]
pub struct FtpConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub options: FtpOptions,
}

// ─── Replies ─────────────────────────────────────────────────────────

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Reply text without the leading code, lines joined by `\n`.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| {
                if l.len() >= 4 && l.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
                    &l[4..]
                } else {
                    l.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 1xx
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

// ─── Session ─────────────────────────────────────────────────────────

/// Capabilities advertised in the FEAT reply that this client cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub utf8: bool,
    pub epsv: bool,
    pub tvfs: bool,
    pub mlsd: bool,
    pub raw_features: Vec<String>,
}

impl ServerFeatures {
    /// Parse the body of a `211` FEAT reply.
    pub fn from_feat(resp: &FtpResponse) -> Self {
        let raw: Vec<String> = resp
            .lines
            .iter()
            .filter(|l| !l.starts_with("211"))
            .map(|l| l.trim().to_uppercase())
            .filter(|l| !l.is_empty())
            .collect();
        let has = |feat: &str| raw.iter().any(|l| l.starts_with(feat));
        Self {
            utf8: has("UTF8"),
            epsv: has("EPSV"),
            tvfs: has("TVFS"),
            mlsd: has("MLSD"),
            raw_features: raw,
        }
    }
}

/// Bookkeeping for a connected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub security: FtpSecurityMode,
    pub server_banner: Option<String>,
    pub system_type: Option<String>,
    pub current_directory: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
}
