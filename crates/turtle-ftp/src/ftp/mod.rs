//! FTP / FTPS upload client.
//!
//! Own RFC 959 control-channel codec on tokio, explicit (`AUTH TLS`) and
//! implicit TLS via native-tls, passive data channels, and a `Transport`
//! implementation for the deploy pipeline.

pub mod client;
pub mod connection;
pub mod directory;
pub mod error;
pub mod file_ops;
pub mod protocol;
pub mod tls;
pub mod transfer;
pub mod transport;
pub mod types;
