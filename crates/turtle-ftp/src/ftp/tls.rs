//! TLS helpers for explicit and implicit FTPS (RFC 4217).

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{ControlReader, ControlWriter, FtpCodec};
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, TlsStream};

pub fn build_tls_connector(accept_invalid_certs: bool) -> FtpResult<TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    if accept_invalid_certs {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    Ok(TlsConnector::from(builder.build()?))
}

/// Upgrade a plain control connection after `AUTH TLS` was accepted.
pub async fn upgrade_to_tls(
    codec: FtpCodec,
    host: &str,
    accept_invalid_certs: bool,
) -> FtpResult<FtpCodec> {
    let peer = codec.peer;
    let tcp = match (codec.reader, codec.writer) {
        (ControlReader::Plain(rd), ControlWriter::Plain(wr)) => rd
            .into_inner()
            .reunite(wr)
            .map_err(|e| FtpError::protocol_error(format!("Reunite failed: {}", e)))?,
        _ => {
            return Err(FtpError::protocol_error(
                "Cannot upgrade: control connection is already TLS",
            ))
        }
    };

    let tls = build_tls_connector(accept_invalid_certs)?
        .connect(host, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Explicit TLS handshake: {}", e)))?;
    Ok(FtpCodec::from_tls(tls, peer))
}

/// TLS-wrap a freshly opened data connection (PROT P).
pub async fn wrap_data_stream(
    tcp: TcpStream,
    host: &str,
    accept_invalid_certs: bool,
) -> FtpResult<TlsStream<TcpStream>> {
    build_tls_connector(accept_invalid_certs)?
        .connect(host, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Data channel TLS: {}", e)))
}
