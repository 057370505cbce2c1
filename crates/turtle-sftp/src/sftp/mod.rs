// ── SFTP upload client over libssh2 ─────────────────────────────────────────
//
// ssh2 is blocking; every call runs on tokio's blocking pool behind a
// per-session mutex.

pub mod dir_ops;
pub mod error;
pub mod exec;
pub mod keys;
pub mod service;
pub mod transfer;
pub mod transport;
pub mod types;
