//! Environment configuration, read once at startup.

use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use turtle_core::{Credential, DeployError, DeployResult, RemoteTarget};
use turtle_ftp::FtpSecurityMode;

const DEFAULT_SERVER_PATH: &str = "/";
const DEFAULT_LOCAL_PATH: &str = "./website";
const DEFAULT_JS_PATH: &str = "./src";
const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Local directories the tasks work on. Needed by every task, including
/// `build`, so they never require remote settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPaths {
    /// Build output mirrored to the server.
    pub website: PathBuf,
    /// Script sources; changes trigger a JS rebuild in watch mode.
    pub scripts: PathBuf,
}

impl LocalPaths {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str, default: &str| {
            PathBuf::from(non_empty(lookup(name)).unwrap_or_else(|| default.to_string()))
        };
        Self {
            website: get("LOCAL_PATH", DEFAULT_LOCAL_PATH),
            scripts: get("JS_PATH", DEFAULT_JS_PATH),
        }
    }
}

/// Everything `deploy` and `watch` need.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: RemoteTarget,
    pub paths: LocalPaths,
    pub ftp_security: FtpSecurityMode,
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
    pub debounce: Duration,
}

impl Settings {
    pub fn from_env() -> DeployResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Validate the variables returned by `lookup`. Every missing variable is
    /// reported in one error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DeployResult<Self> {
        let var = |name: &str| non_empty(lookup(name));
        let mut missing: Vec<&str> = Vec::new();

        let host = var("SERVER_HOST");
        if host.is_none() {
            missing.push("SERVER_HOST");
        }
        let user = var("SERVER_USER");
        if user.is_none() {
            missing.push("SERVER_USER");
        }

        let password = var("SERVER_PASSWORD");
        let key = var("SERVER_KEY").map(PathBuf::from);
        if let Some(path) = key.as_deref() {
            if !path.is_file() {
                missing.push("SERVER_KEY");
            }
        }
        if password.is_none() && key.is_none() {
            missing.push("SERVER_PASSWORD or SERVER_KEY");
        }

        if !missing.is_empty() {
            return Err(DeployError::config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let ftp_security = match var("FTP_SECURITY") {
            Some(raw) => raw
                .parse::<FtpSecurityMode>()
                .map_err(|e| DeployError::config(format!("FTP_SECURITY: {}", e.message)))?,
            None => FtpSecurityMode::default(),
        };
        let accept_invalid_certs = parse_bool(&lookup, "FTP_ACCEPT_INVALID_CERTS")?.unwrap_or(false);
        let connect_timeout =
            Duration::from_secs(parse_num(&lookup, "CONNECT_TIMEOUT_SECS")?.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS));
        let debounce = Duration::from_millis(parse_num(&lookup, "WATCH_DEBOUNCE_MS")?.unwrap_or(DEFAULT_DEBOUNCE_MS));

        // Password wins when both credentials are present.
        let (credential, port) = match (password, key) {
            (Some(pw), _) => {
                let port = parse_num(&lookup, "FTP_PORT")?.unwrap_or_else(|| ftp_security.default_port());
                (Credential::Password(SecretString::new(pw)), port)
            }
            (None, Some(path)) => {
                let port = parse_num(&lookup, "SFTP_PORT")?.unwrap_or(DEFAULT_SFTP_PORT);
                (Credential::PrivateKey(path), port)
            }
            (None, None) => return Err(DeployError::config("No password or key provided")),
        };

        let target = RemoteTarget {
            host: host.unwrap_or_default(),
            port,
            username: user.unwrap_or_default(),
            credential,
            remote_root: var("SERVER_PATH").unwrap_or_else(|| DEFAULT_SERVER_PATH.to_string()),
        };
        debug!(
            "Loaded settings for {}@{} over {}",
            target.username,
            target.address(),
            target.transport_kind()
        );

        Ok(Self {
            target,
            paths: LocalPaths::from_lookup(&lookup),
            ftp_security,
            accept_invalid_certs,
            connect_timeout,
            debounce,
        })
    }

    pub fn key_path(&self) -> Option<&Path> {
        match &self.target.credential {
            Credential::PrivateKey(p) => Some(p),
            Credential::Password(_) => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> DeployResult<Option<T>> {
    match non_empty(lookup(name)) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| DeployError::config(format!("{} must be a number, got '{}'", name, raw))),
        None => Ok(None),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> DeployResult<Option<bool>> {
    match non_empty(lookup(name)).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(DeployError::config(format!("{} must be true or false, got '{}'", name, v))),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use turtle_core::{DeployErrorKind, TransportKind};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_host_is_reported() {
        let err = Settings::from_lookup(env(&[("SERVER_USER", "deploy"), ("SERVER_PASSWORD", "pw")])).unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::Config);
        assert!(err.message.contains("SERVER_HOST"));
        assert!(!err.message.contains("SERVER_USER"));
    }

    #[test]
    fn every_missing_variable_is_listed() {
        let err = Settings::from_lookup(env(&[])).unwrap_err();
        assert_eq!(
            err.message,
            "Missing required environment variables: SERVER_HOST, SERVER_USER, SERVER_PASSWORD or SERVER_KEY"
        );
    }

    #[test]
    fn password_selects_ftp_with_defaults() {
        let s = Settings::from_lookup(env(&[
            ("SERVER_HOST", "ftp.example.org"),
            ("SERVER_USER", "deploy"),
            ("SERVER_PASSWORD", "pw"),
        ]))
        .unwrap();
        assert_eq!(s.target.transport_kind(), TransportKind::Ftp);
        assert_eq!(s.target.port, 21);
        assert_eq!(s.target.remote_root, "/");
        assert_eq!(s.paths.website, PathBuf::from("./website"));
        assert_eq!(s.paths.scripts, PathBuf::from("./src"));
        assert_eq!(s.connect_timeout, Duration::from_secs(20));
        assert_eq!(s.debounce, Duration::from_millis(500));
        assert_eq!(s.ftp_security, FtpSecurityMode::Explicit);
    }

    #[test]
    fn implicit_tls_defaults_to_990() {
        let s = Settings::from_lookup(env(&[
            ("SERVER_HOST", "ftp.example.org"),
            ("SERVER_USER", "deploy"),
            ("SERVER_PASSWORD", "pw"),
            ("FTP_SECURITY", "implicit"),
        ]))
        .unwrap();
        assert_eq!(s.target.port, 990);
    }

    #[test]
    fn key_selects_sftp() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "key").unwrap();
        let s = Settings::from_lookup(env(&[
            ("SERVER_HOST", "ssh.example.org"),
            ("SERVER_USER", "deploy"),
            ("SERVER_KEY", key.to_str().unwrap()),
            ("SFTP_PORT", "2222"),
            ("SERVER_PATH", "/var/www"),
        ]))
        .unwrap();
        assert_eq!(s.target.transport_kind(), TransportKind::Sftp);
        assert_eq!(s.target.port, 2222);
        assert_eq!(s.key_path(), Some(key.as_path()));
        assert_eq!(s.target.remote_root, "/var/www");
    }

    #[test]
    fn key_file_must_exist() {
        let err = Settings::from_lookup(env(&[
            ("SERVER_HOST", "ssh.example.org"),
            ("SERVER_USER", "deploy"),
            ("SERVER_KEY", "/definitely/not/here/id_rsa"),
        ]))
        .unwrap_err();
        assert_eq!(err.message, "Missing required environment variables: SERVER_KEY");
    }

    #[test]
    fn password_wins_over_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_rsa");
        std::fs::write(&key, "key").unwrap();
        let s = Settings::from_lookup(env(&[
            ("SERVER_HOST", "example.org"),
            ("SERVER_USER", "deploy"),
            ("SERVER_PASSWORD", "pw"),
            ("SERVER_KEY", key.to_str().unwrap()),
        ]))
        .unwrap();
        assert_eq!(s.target.transport_kind(), TransportKind::Ftp);
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let err = Settings::from_lookup(env(&[
            ("SERVER_HOST", "example.org"),
            ("SERVER_USER", "deploy"),
            ("SERVER_PASSWORD", "pw"),
            ("WATCH_DEBOUNCE_MS", "soon"),
        ]))
        .unwrap_err();
        assert_eq!(err.kind, DeployErrorKind::Config);
        assert!(err.message.contains("WATCH_DEBOUNCE_MS"));
    }

    #[test]
    #[serial]
    fn reads_the_process_environment() {
        std::env::set_var("LOCAL_PATH", "./public");
        std::env::remove_var("JS_PATH");
        let paths = LocalPaths::from_env();
        std::env::remove_var("LOCAL_PATH");
        assert_eq!(paths.website, PathBuf::from("./public"));
        assert_eq!(paths.scripts, PathBuf::from("./src"));
    }
}
