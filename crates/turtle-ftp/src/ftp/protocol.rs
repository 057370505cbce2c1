//! Control-channel codec (RFC 959 §4).
//!
//! Commands go out CRLF-terminated; replies are assembled line by line
//! until the `NNN ` terminator of a multi-line block.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpResponse;
use std::net::IpAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tracing::trace;

/// Read side of the control connection.
pub enum ControlReader {
    Plain(BufReader<OwnedReadHalf>),
    Tls(BufReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>),
}

/// Write side of the control connection.
pub enum ControlWriter {
    Plain(OwnedWriteHalf),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
}

pub struct FtpCodec {
    pub(crate) reader: ControlReader,
    pub(crate) writer: ControlWriter,
    /// Address of the server end of the control connection. Data channels
    /// connect here when the PASV address is unusable.
    pub(crate) peer: IpAddr,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream, peer: IpAddr) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: ControlReader::Plain(BufReader::new(rd)),
            writer: ControlWriter::Plain(wr),
            peer,
        }
    }

    pub fn from_tls(stream: TlsStream<TcpStream>, peer: IpAddr) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: ControlReader::Tls(BufReader::new(rd)),
            writer: ControlWriter::Tls(wr),
            peer,
        }
    }

    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.writer, ControlWriter::Tls(_))
    }

    /// Send one command; CRLF is appended here.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        match &mut self.writer {
            ControlWriter::Plain(w) => w.write_all(line.as_bytes()).await?,
            ControlWriter::Tls(w) => {
                w.write_all(line.as_bytes()).await?;
                w.flush().await?;
            }
        }
        trace!(">>> {}", redact(cmd));
        Ok(())
    }

    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let n = match &mut self.reader {
            ControlReader::Plain(r) => r.read_line(&mut buf).await?,
            ControlReader::Tls(r) => r.read_line(&mut buf).await?,
        };
        if n == 0 {
            return Err(FtpError::disconnected("Server closed the control connection"));
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read one complete reply.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line().await?;
        let mut reply = ReplyAssembler::start(first)?;
        while !reply.is_complete() {
            let next = self.read_line().await?;
            reply.push(next);
        }
        let resp = reply.finish();
        trace!("<<< {} {}", resp.code, resp.lines.last().map(String::as_str).unwrap_or(""));
        if resp.code == 421 {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send `cmd` and require a reply in class `Nxx`.
    pub async fn expect(&mut self, cmd: &str, class: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if resp.code / 100 != class {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.expect(cmd, 2).await
    }
}

// ─── Reply assembly ──────────────────────────────────────────────────

/// Collects the lines of one reply. A first line of the form `NNN-text`
/// opens a block that ends at the first line starting with `NNN `.
pub(crate) struct ReplyAssembler {
    code: u16,
    lines: Vec<String>,
    terminator: Option<String>,
}

impl ReplyAssembler {
    pub(crate) fn start(first: String) -> FtpResult<Self> {
        let code = parse_code(&first)?;
        let terminator = (first.as_bytes().get(3) == Some(&b'-')).then(|| format!("{} ", code));
        Ok(Self {
            code,
            lines: vec![first],
            terminator,
        })
    }

    pub(crate) fn is_complete(&self) -> bool {
        match &self.terminator {
            None => true,
            Some(t) => self.lines.len() > 1 && self.lines.last().map_or(false, |l| l.starts_with(t.as_str())),
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    pub(crate) fn finish(self) -> FtpResponse {
        FtpResponse {
            code: self.code,
            lines: self.lines,
        }
    }
}

fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| FtpError::protocol_error(format!("Malformed reply line: '{}'", line)))?;
    digits
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error(format!("Invalid reply code in: '{}'", line)))
}

/// Hide the password in traced commands.
fn redact(cmd: &str) -> &str {
    match cmd.get(..5) {
        Some(verb) if verb.eq_ignore_ascii_case("PASS ") => "PASS ****",
        _ => cmd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn assemble(lines: &[&str]) -> (FtpResponse, usize) {
        let mut it = lines.iter().map(|s| s.to_string());
        let mut reply = ReplyAssembler::start(it.next().unwrap()).unwrap();
        let mut consumed = 1;
        while !reply.is_complete() {
            reply.push(it.next().unwrap());
            consumed += 1;
        }
        (reply.finish(), consumed)
    }

    #[test]
    fn test_single_line_reply() {
        let (r, n) = assemble(&["200 Type set to I", "ignored"]);
        assert_eq!(r.code, 200);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_multi_line_reply() {
        let (r, n) = assemble(&[
            "220-Welcome",
            "220-second line",
            " 220 indented lines do not terminate",
            "220 Ready",
            "331 next reply",
        ]);
        assert_eq!(r.code, 220);
        assert_eq!(n, 4);
        assert_eq!(r.lines.last().unwrap(), "220 Ready");
    }

    #[test]
    fn test_malformed_reply() {
        assert!(ReplyAssembler::start("OK".into()).is_err());
        assert!(ReplyAssembler::start("abc hello".into()).is_err());
    }

    #[test]
    fn test_password_is_redacted() {
        assert_eq!(redact("PASS hunter2"), "PASS ****");
        assert_eq!(redact("pass hunter2"), "PASS ****");
        assert_eq!(redact("USER deploy"), "USER deploy");
    }

    async fn scripted_server(script: &'static [u8]) -> FtpCodec {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(script).await.unwrap();
        });
        let tcp = TcpStream::connect(addr).await.unwrap();
        FtpCodec::from_tcp(tcp, addr.ip())
    }

    #[tokio::test]
    async fn test_codec_reads_replies_then_eof() {
        let mut codec = scripted_server(b"220-Hello\r\n220 Ready\r\n257 \"/www\" created\r\n").await;
        assert_eq!(codec.read_response().await.unwrap().code, 220);
        let mkd = codec.read_response().await.unwrap();
        assert_eq!(mkd.text(), "\"/www\" created");
        let err = codec.read_response().await.unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::Disconnected);
    }

    #[tokio::test]
    async fn test_421_is_a_disconnect() {
        let mut codec = scripted_server(b"421 Idle timeout\r\n").await;
        let err = codec.read_response().await.unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::Disconnected);
        assert_eq!(err.code, Some(421));
    }
}
