use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    20
}

fn default_keepalive() -> u64 {
    30
}

/// Everything needed to open a key-authenticated SFTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub private_key: PathBuf,
    /// Applies to the TCP connect, the handshake and every blocking libssh2 call.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// libssh2's own keepalive; 0 disables it.
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
}

impl SftpConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, private_key: PathBuf) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            private_key,
            timeout_secs: default_timeout(),
            keepalive_interval_secs: default_keepalive(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which on-disk format the private key was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    OpenSsh,
    /// PKCS#1 / PKCS#8 / SEC1 PEM, handed straight to libssh2.
    LegacyPem,
}

#[derive(Debug, Clone)]
pub struct SftpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub server_banner: Option<String>,
    pub connected_at: Instant,
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    pub commands_run: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg: SftpConnectionConfig = serde_json::from_str(
            r#"{"host":"example.org","username":"deploy","privateKey":"/home/deploy/.ssh/id_ed25519"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.timeout_secs, 20);
        assert_eq!(cfg.keepalive_interval_secs, 30);
        assert_eq!(cfg.address(), "example.org:22");
    }
}
