//! Picks the transport variant from the credential and opens it.

use crate::config::Settings;
use async_trait::async_trait;
use turtle_core::{ClosedFlag, Connector, Credential, DeployResult, RemoteTarget, Transport};
use turtle_ftp::{FtpConnectionConfig, FtpOptions, FtpTransport};
use turtle_sftp::{SftpConnectionConfig, SftpTransport};

pub struct DefaultConnector {
    ftp: FtpOptions,
    timeout_secs: u64,
}

impl DefaultConnector {
    pub fn new(settings: &Settings) -> Self {
        let ftp = FtpOptions {
            security: settings.ftp_security,
            accept_invalid_certs: settings.accept_invalid_certs,
            connect_timeout_sec: settings.connect_timeout.as_secs(),
            ..FtpOptions::default()
        };
        Self {
            ftp,
            timeout_secs: settings.connect_timeout.as_secs(),
        }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, target: &RemoteTarget, closed: ClosedFlag) -> DeployResult<Box<dyn Transport>> {
        match &target.credential {
            Credential::Password(password) => {
                let config = FtpConnectionConfig {
                    host: target.host.clone(),
                    port: target.port,
                    username: target.username.clone(),
                    password: password.clone(),
                    options: self.ftp.clone(),
                };
                Ok(Box::new(FtpTransport::connect(config, closed).await?))
            }
            Credential::PrivateKey(key) => {
                let mut config =
                    SftpConnectionConfig::new(target.host.clone(), target.port, target.username.clone(), key.clone());
                config.timeout_secs = self.timeout_secs;
                Ok(Box::new(SftpTransport::connect(config, closed).await?))
            }
        }
    }
}
