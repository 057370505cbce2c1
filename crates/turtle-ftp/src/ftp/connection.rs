//! Opens the control connection: TCP connect under the configured deadline,
//! implicit-TLS wrapping, and the server greeting.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls::build_tls_connector;
use crate::ftp::types::{FtpConnectionConfig, FtpResponse, FtpSecurityMode};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Connect and return the codec plus the `220` greeting. Explicit FTPS is
/// negotiated afterwards by the client.
pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<(FtpCodec, FtpResponse)> {
    let addr = format!("{}:{}", config.host, config.port);
    let dur = Duration::from_secs(config.options.connect_timeout_sec);

    let tcp = timeout(dur, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out after {:?}", addr, dur)))?
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
    tcp.set_nodelay(true).ok();
    let peer = tcp
        .peer_addr()
        .map_err(|e| FtpError::connection_failed(format!("Peer address of {}: {}", addr, e)))?
        .ip();
    debug!("FTP control connection to {} ({})", addr, peer);

    let mut codec = if config.options.security == FtpSecurityMode::Implicit {
        let tls = timeout(
            dur,
            build_tls_connector(config.options.accept_invalid_certs)?.connect(&config.host, tcp),
        )
        .await
        .map_err(|_| FtpError::timeout("Implicit TLS handshake timed out"))?
        .map_err(|e| FtpError::tls_failed(format!("Implicit TLS handshake: {}", e)))?;
        FtpCodec::from_tls(tls, peer)
    } else {
        FtpCodec::from_tcp(tcp, peer)
    };

    let banner = timeout(dur, codec.read_response())
        .await
        .map_err(|_| FtpError::timeout("No greeting from server"))??;
    if !banner.is_success() {
        return Err(FtpError::connection_failed(format!(
            "Server refused connection: {} {}",
            banner.code,
            banner.text()
        )));
    }
    Ok((codec, banner))
}
