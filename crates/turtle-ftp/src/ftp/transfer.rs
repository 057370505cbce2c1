//! Passive data channels (RFC 959 PASV, RFC 2428 EPSV).
//!
//! The data socket is TLS-wrapped whenever the control channel is secured,
//! but only once the server has answered the transfer command: servers that
//! follow RFC 4217 strictly do not start the handshake before that.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::types::DataChannelMode;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// A connected data channel, plain or TLS.
pub enum DataStream {
    Plain(TcpStream),
    Tls(tokio_native_tls::TlsStream<TcpStream>),
}

impl DataStream {
    fn writer(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(tls) => tls,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> FtpResult<()> {
        self.writer().write_all(buf).await?;
        Ok(())
    }

    /// Flush and close the write side so the server sees end-of-file.
    pub async fn finish(mut self) -> FtpResult<()> {
        let w = self.writer();
        w.flush().await?;
        w.shutdown().await?;
        Ok(())
    }
}

pub struct DataChannelParams<'a> {
    pub mode: DataChannelMode,
    pub host: &'a str,
    pub secure: bool,
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

/// A data socket that is connected but not yet usable. Call
/// [`PendingData::activate`] after the server accepted the transfer command.
pub struct PendingData {
    tcp: TcpStream,
    target: SocketAddr,
    tls_host: Option<String>,
    accept_invalid_certs: bool,
    timeout: Duration,
}

impl PendingData {
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Run the PROT P handshake (if any) under the data timeout.
    pub async fn activate(self) -> FtpResult<DataStream> {
        let Some(host) = self.tls_host else {
            return Ok(DataStream::Plain(self.tcp));
        };
        let tls = timeout(
            self.timeout,
            tls::wrap_data_stream(self.tcp, &host, self.accept_invalid_certs),
        )
        .await
        .map_err(|_| {
            FtpError::data_channel(format!(
                "Data channel TLS handshake with {} timed out after {:?}",
                self.target, self.timeout
            ))
        })??;
        Ok(DataStream::Tls(tls))
    }
}

/// Negotiate a passive data connection and open the TCP socket.
pub async fn open_data_channel(codec: &mut FtpCodec, params: DataChannelParams<'_>) -> FtpResult<PendingData> {
    let target = match params.mode {
        DataChannelMode::Passive => {
            let resp = codec.expect_ok("PASV").await?;
            resolve_pasv_target(parse_pasv_response(&resp.text())?, codec.peer())
        }
        DataChannelMode::ExtendedPassive => {
            let resp = codec.expect_ok("EPSV").await?;
            SocketAddr::new(codec.peer(), parse_epsv_response(&resp.text())?)
        }
    };
    debug!("Data channel {:?} -> {}", params.mode, target);

    let tcp = timeout(params.timeout, TcpStream::connect(target))
        .await
        .map_err(|_| FtpError::data_channel(format!("Data connect to {} timed out", target)))?
        .map_err(|e| FtpError::data_channel(format!("Data connect to {}: {}", target, e)))?;

    Ok(PendingData {
        tcp,
        target,
        tls_host: params.secure.then(|| params.host.to_string()),
        accept_invalid_certs: params.accept_invalid_certs,
        timeout: params.timeout,
    })
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply.
fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let re = Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)")
        .map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let mut nums = [0u8; 6];
    for (i, slot) in nums.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse::<u8>()
            .map_err(|_| FtpError::protocol_error(format!("PASV number out of range: {}", text)))?;
    }

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) << 8 | u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}

/// Servers behind NAT often advertise an internal or unspecified address.
/// Use the control connection's peer instead whenever the advertised one
/// cannot be reached from here.
fn resolve_pasv_target(advertised: SocketAddr, peer: IpAddr) -> SocketAddr {
    let unroutable = |ip: IpAddr| match ip {
        IpAddr::V4(v4) => v4.is_unspecified() || v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_unspecified() || v6.is_loopback(),
    };
    let advertised_ip = advertised.ip();
    if advertised_ip.is_unspecified() || (unroutable(advertised_ip) && !unroutable(peer)) || peer.is_ipv6() {
        SocketAddr::new(peer, advertised.port())
    } else {
        advertised
    }
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Parse the port from `229 Entering Extended Passive Mode (|||port|)`.
fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let re = Regex::new(r"\|\|\|(\d+)\|").map_err(|e| FtpError::protocol_error(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error(format!("EPSV port out of range: {}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_pasv() {
        let addr = parse_pasv_response("Entering Passive Mode (192,168,1,10,195,80).").unwrap();
        assert_eq!(addr, "192.168.1.10:50000".parse().unwrap());
        // some servers omit the parentheses
        let addr = parse_pasv_response("Entering Passive Mode 10,0,0,1,4,1").unwrap();
        assert_eq!(addr.port(), 1025);
        assert!(parse_pasv_response("Entering Passive Mode (300,1,1,1,1,1)").is_err());
        assert!(parse_pasv_response("nope").is_err());
    }

    #[test]
    fn test_parse_epsv() {
        assert_eq!(parse_epsv_response("Entering Extended Passive Mode (|||40123|)").unwrap(), 40123);
        assert!(parse_epsv_response("Entering Extended Passive Mode").is_err());
    }

    #[test]
    fn test_pasv_target_rewrites_private_address() {
        let public = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        let private: SocketAddr = "10.0.0.5:40000".parse().unwrap();
        assert_eq!(resolve_pasv_target(private, public), SocketAddr::new(public, 40000));

        let unspecified: SocketAddr = "0.0.0.0:40001".parse().unwrap();
        assert_eq!(resolve_pasv_target(unspecified, public), SocketAddr::new(public, 40001));

        // both sides on the LAN: trust the server
        let lan_peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(resolve_pasv_target(private, lan_peer), private);

        let routable: SocketAddr = "198.51.100.20:40002".parse().unwrap();
        assert_eq!(resolve_pasv_target(routable, public), routable);
    }
}
