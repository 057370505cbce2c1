pub mod ftp;

pub use ftp::client::FtpClient;
pub use ftp::error::{FtpError, FtpErrorKind, FtpResult};
pub use ftp::transport::FtpTransport;
pub use ftp::types::{DataChannelMode, FtpConnectionConfig, FtpOptions, FtpSecurityMode, TreeUploadMode};
