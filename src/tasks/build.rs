//! External build collaborator: Composer for the PHP side, Bun for scripts.

use crate::config::LocalPaths;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};
use turtle_core::{DeployError, DeployResult};

/// One subprocess of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Route output to `debug` instead of `info`.
    pub quiet: bool,
}

impl BuildStep {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            quiet: false,
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion. Non-zero exit is a `Build` error carrying stderr.
    pub async fn run(&self) -> DeployResult<()> {
        if !self.quiet {
            info!("Running command: {}", self.command_line());
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| DeployError::build(format!("Cannot run `{}`: {}", self.program, e)))?;

        for line in String::from_utf8_lossy(&output.stdout).lines().filter(|l| !l.trim().is_empty()) {
            if self.quiet {
                debug!("{}", line);
            } else {
                info!("{}", line);
            }
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let mut err = DeployError::build(format!("Command \"{}\" exited with code {}", self.command_line(), code));
            err.exit_code = Some(code);
            err.stderr = Some(String::from_utf8_lossy(&output.stderr).trim().to_string());
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
pub trait Builder: Send + Sync {
    /// Everything `build` and `deploy` need.
    async fn build_all(&self) -> DeployResult<()>;

    /// Only the script bundle; what watch mode reruns.
    async fn build_scripts(&self, quiet: bool) -> DeployResult<()>;
}

/// Composer + Bun, driven from the project directory.
pub struct Toolchain {
    composer_dir: PathBuf,
    project_dir: PathBuf,
}

impl Toolchain {
    pub fn new(paths: &LocalPaths) -> Self {
        Self {
            composer_dir: paths.website.join("composer"),
            project_dir: PathBuf::from("."),
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    fn script_steps(&self, quiet: bool) -> Vec<BuildStep> {
        vec![
            BuildStep::new("bun", &["install"]).in_dir(&self.project_dir).quiet(quiet),
            BuildStep::new("bun", &["run", "build.ts"]).in_dir(&self.project_dir).quiet(quiet),
        ]
    }

    async fn build_composer(&self) -> DeployResult<()> {
        if !self.composer_dir.join("composer.json").is_file() {
            debug!("No composer.json under {}, skipping Composer", self.composer_dir.display());
            return Ok(());
        }
        info!("Building Composer...");
        let probe = BuildStep::new("composer", &["--version"]).in_dir(&self.composer_dir).quiet(true);
        if let Err(e) = probe.run().await {
            warn!("Composer is not available ({}), skipping", e.message);
            return Ok(());
        }
        BuildStep::new("composer", &["install", "--no-dev", "--optimize-autoloader"])
            .in_dir(&self.composer_dir)
            .run()
            .await
            .map_err(|mut e| {
                warn!("Please make sure Composer is installed and accessible from the command line.");
                warn!("You can download Composer from https://getcomposer.org/");
                e.message = format!("Composer build failed: {}", e.message);
                e
            })?;
        info!("Composer build completed.");
        Ok(())
    }
}

#[async_trait]
impl Builder for Toolchain {
    async fn build_all(&self) -> DeployResult<()> {
        self.build_composer().await?;
        self.build_scripts(false).await?;
        info!("Build process completed successfully.");
        Ok(())
    }

    async fn build_scripts(&self, quiet: bool) -> DeployResult<()> {
        if !quiet {
            info!("Building JavaScript...");
        }
        if !self.project_dir.join("package.json").is_file() {
            return Err(DeployError::build(
                "package.json not found. Make sure it exists and contains the necessary build scripts.",
            )
            .with_path(self.project_dir.display().to_string()));
        }
        for step in self.script_steps(quiet) {
            step.run().await?;
        }
        if quiet {
            debug!("JavaScript rebuilt");
        } else {
            info!("JavaScript build completed.");
        }
        Ok(())
    }
}
