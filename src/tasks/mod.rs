//! The three CLI tasks.

pub mod build;
pub mod deploy;
pub mod watch;

use crate::config::{LocalPaths, Settings};
use crate::connector::DefaultConnector;
use build::{Builder, Toolchain};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use turtle_core::{ConnectionManager, DeployResult};
use watch::WatchSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Build,
    Deploy,
    Watch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTask(pub String);

impl fmt::Display for UnknownTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown task: {}", self.0)
    }
}

impl std::error::Error for UnknownTask {}

impl FromStr for Task {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "deploy" => Ok(Self::Deploy),
            "watch" => Ok(Self::Watch),
            other => Err(UnknownTask(other.to_string())),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Watch => "watch",
        })
    }
}

/// Run `task` against the process environment.
pub async fn run(task: Task) -> DeployResult<()> {
    match task {
        Task::Build => {
            info!("Building...");
            Toolchain::new(&LocalPaths::from_env()).build_all().await
        }
        Task::Deploy => {
            let settings = Settings::from_env()?;
            let manager = manager_for(&settings);
            let toolchain = Toolchain::new(&settings.paths);
            deploy::run_deploy(&manager, &toolchain, &settings.paths.website).await?;
            Ok(())
        }
        Task::Watch => {
            let settings = Settings::from_env()?;
            let manager = Arc::new(manager_for(&settings));
            let builder: Arc<dyn Builder> = Arc::new(Toolchain::new(&settings.paths));
            let session = WatchSession::new(manager, builder, settings.paths.clone(), settings.debounce);
            session
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
        }
    }
}

fn manager_for(settings: &Settings) -> ConnectionManager {
    ConnectionManager::new(Arc::new(DefaultConnector::new(settings)), settings.target.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names() {
        assert_eq!("build".parse::<Task>().unwrap(), Task::Build);
        assert_eq!("deploy".parse::<Task>().unwrap(), Task::Deploy);
        assert_eq!("watch".parse::<Task>().unwrap(), Task::Watch);
        assert_eq!(Task::Watch.to_string(), "watch");
    }

    #[test]
    fn unknown_task_message() {
        let err = "publish".parse::<Task>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown task: publish");
        assert!("Deploy".parse::<Task>().is_err());
    }
}
