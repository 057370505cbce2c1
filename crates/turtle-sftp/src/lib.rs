pub mod sftp;

pub use sftp::error::{SftpError, SftpErrorKind, SftpResult};
pub use sftp::exec::shell_escape;
pub use sftp::transport::SftpTransport;
pub use sftp::keys::{load_private_key, validate_private_key};
pub use sftp::service::SftpService;
pub use sftp::types::{KeyFormat, SftpConnectionConfig};
