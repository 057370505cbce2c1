//! Build, deploy and watch pipeline for a website tree served over FTP(S) or
//! SFTP.

pub mod config;
pub mod connector;
pub mod logging;
pub mod tasks;

pub use config::{LocalPaths, Settings};
pub use connector::DefaultConnector;
pub use tasks::build::{BuildStep, Builder, Toolchain};
pub use tasks::deploy::{ensure_remote_root, run_deploy};
pub use tasks::watch::WatchSession;
pub use tasks::Task;
