//! `Transport` implementation over an `SftpService`.

use crate::sftp::error::{SftpErrorKind, SftpResult};
use crate::sftp::service::SftpService;
use crate::sftp::types::SftpConnectionConfig;
use async_trait::async_trait;
use std::path::Path;
use tracing::warn;
use turtle_core::{ClosedFlag, DeployError, DeployErrorKind, DeployResult, MkdirError, Transport, TransportKind};

pub struct SftpTransport {
    service: SftpService,
    closed: ClosedFlag,
}

impl SftpTransport {
    pub async fn connect(config: SftpConnectionConfig, closed: ClosedFlag) -> DeployResult<Self> {
        let service = SftpService::connect(config).await?;
        Ok(Self { service, closed })
    }

    pub fn service(&self) -> &SftpService {
        &self.service
    }

    fn track<T>(&self, result: SftpResult<T>) -> DeployResult<T> {
        result.map_err(|e| {
            if e.kind == SftpErrorKind::Disconnected && self.closed.mark() {
                warn!("SFTP session {} lost: {}", self.service.id(), e);
            }
            DeployError::from(e)
        })
    }
}

#[async_trait]
impl Transport for SftpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
    }

    async fn mkdir(&mut self, remote: &str) -> Result<(), MkdirError> {
        let result = self.service.mkdir(remote).await;
        if let Err(MkdirError::Failed(e)) = &result {
            if e.kind == DeployErrorKind::Disconnected {
                self.closed.mark();
            }
        }
        result
    }

    async fn upload_file(&mut self, local: &Path, remote: &str) -> DeployResult<u64> {
        let result = self.service.upload(local, remote).await;
        self.track(result)
    }

    async fn exec(&mut self, command: &str) -> DeployResult<String> {
        let result = self.service.exec(command).await;
        self.track(result)
    }

    async fn keepalive(&mut self) -> DeployResult<()> {
        let result = self.service.ping().await;
        self.track(result)
    }

    async fn close(&mut self) -> DeployResult<()> {
        self.closed.mark();
        let result = self.service.disconnect().await;
        self.track(result)
    }
}
