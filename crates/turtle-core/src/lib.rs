//! Shared building blocks for the deploy pipeline: the error taxonomy, the
//! `Transport` capability, the directory mirror engine and the connection
//! lifecycle manager.

pub mod error;
pub mod lifecycle;
pub mod mirror;
pub mod retry;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{DeployError, DeployErrorKind, DeployResult, MkdirError};
pub use lifecycle::{Connection, ConnectionManager, GuardedTransport};
pub use mirror::{mirror_path, mirror_tree};
pub use retry::RetryPolicy;
pub use transport::{ClosedFlag, Connector, Transport};
pub use types::*;
