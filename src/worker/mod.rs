//! Runs a single deploy: sync the repository, read its `deploy.yml`, run the
//! build scripts, promote the tree into place, then run the deploy scripts.

pub mod command;
pub mod config;

use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info};

use crate::error::WorkerError;
use crate::payload::PushEvent;
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use config::DeployConfig;

/// Settings shared by every deploy
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Repositories are checked out to `<work_dir>/<repo name>`
    pub work_dir: PathBuf,
    /// Interpreter used for build and deploy scripts
    pub shell: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Syncing,
    LocatingConfig,
    ParsingConfig,
    Building,
    Promoting,
    Deploying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Syncing => "syncing",
            Stage::LocatingConfig => "locating-config",
            Stage::ParsingConfig => "parsing-config",
            Stage::Building => "building",
            Stage::Promoting => "promoting",
            Stage::Deploying => "deploying",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful deploy did
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub config_path: PathBuf,
    pub clone_path: PathBuf,
    pub scripts_run: Vec<PathBuf>,
}

pub struct Worker<'a> {
    event: PushEvent,
    settings: &'a WorkerSettings,
    runner: &'a dyn CommandRunner,
    stage: Stage,
    failed_during: Option<Stage>,
}

impl<'a> Worker<'a> {
    pub fn new(
        event: PushEvent,
        settings: &'a WorkerSettings,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            event,
            settings,
            runner,
            stage: Stage::Idle,
            failed_during: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The stage that was running when the deploy failed
    pub fn failed_during(&self) -> Option<Stage> {
        self.failed_during
    }

    /// Where the repository is cloned before promotion. Always absolute, since
    /// commands run with differing working directories.
    pub fn checkout_path(&self) -> Result<PathBuf, WorkerError> {
        Ok(absolute(&self.settings.work_dir)?.join(&self.event.repo_name))
    }

    /// Run the whole pipeline. Stops at the first failure; nothing is retried.
    pub async fn deploy(&mut self) -> Result<DeployReport, WorkerError> {
        info!(
            "Deploying {} (branch '{}')",
            self.event.repo_name, self.event.branch
        );

        match self.run_stages().await {
            Ok(report) => {
                self.stage = Stage::Done;
                info!("Finished deploying {}!", self.event.repo_name);
                Ok(report)
            }
            Err(e) => {
                error!(
                    "Deploy of {} failed while {}: {}",
                    self.event.repo_name, self.stage, e
                );
                self.failed_during = Some(self.stage);
                self.stage = Stage::Failed;
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<DeployReport, WorkerError> {
        validate_repo_name(&self.event.repo_name)?;
        let checkout = self.checkout_path()?;

        self.stage = Stage::Syncing;
        self.sync(&checkout).await?;

        self.stage = Stage::LocatingConfig;
        let config_path = config::locate(&checkout)?;

        self.stage = Stage::ParsingConfig;
        info!("Loading config file from {}...", config_path.display());
        let config = DeployConfig::load(&config_path).await?;
        let clone = absolute(&config.clone)?;

        self.stage = Stage::Building;
        let mut scripts_run = self.run_scripts("build", &clone, &config.build).await?;

        self.stage = Stage::Promoting;
        self.promote(&checkout, &clone).await?;

        self.stage = Stage::Deploying;
        scripts_run.extend(self.run_scripts("deployment", &clone, &config.deploy).await?);

        Ok(DeployReport {
            config_path,
            clone_path: clone,
            scripts_run,
        })
    }

    /// Shallow-clone on first sight of a repository, otherwise fetch and
    /// hard-reset the existing checkout to the remote branch.
    async fn sync(&self, checkout: &Path) -> Result<(), WorkerError> {
        let branch = self.event.branch.as_str();

        if checkout.join(".git").exists() {
            info!("Updating {} to origin/{}...", checkout.display(), branch);
            let remote_branch = format!("origin/{}", branch);
            self.git(checkout, &["fetch", "--all"]).await?;
            self.git(checkout, &["checkout", branch]).await?;
            self.git(checkout, &["reset", "--hard", remote_branch.as_str()])
                .await?;
        } else {
            info!(
                "Cloning {} into {}...",
                self.event.origin,
                checkout.display()
            );
            let work_dir = checkout.parent().unwrap_or(checkout);
            tokio::fs::create_dir_all(work_dir)
                .await
                .map_err(|e| WorkerError::io(work_dir, e))?;

            let clone = CommandSpec::new("git")
                .arg("clone")
                .arg("--depth=1")
                .arg("--branch")
                .arg(branch)
                .arg(self.event.origin.as_str())
                .path_arg(checkout)
                .current_dir(work_dir);
            self.runner.run(&clone).await?;
            self.git(checkout, &["checkout", branch]).await?;
        }

        Ok(())
    }

    async fn git(&self, checkout: &Path, args: &[&str]) -> Result<CommandOutput, WorkerError> {
        let spec = args
            .iter()
            .fold(CommandSpec::new("git"), |spec, arg| spec.arg(*arg))
            .current_dir(checkout);
        self.runner.run(&spec).await
    }

    /// Run `scripts` in order from `clone`, stopping at the first failure
    async fn run_scripts(
        &self,
        phase: &str,
        clone: &Path,
        scripts: &[String],
    ) -> Result<Vec<PathBuf>, WorkerError> {
        let mut ran = Vec::with_capacity(scripts.len());
        for script in scripts {
            let script_path = clone.join(script);
            info!("Running {} script {}...", phase, script_path.display());
            make_executable(&script_path).await?;

            let spec = CommandSpec::new(self.settings.shell.as_str())
                .path_arg(&script_path)
                .current_dir(clone);
            self.runner.run(&spec).await?;
            ran.push(script_path);
        }
        Ok(ran)
    }

    /// Mirror the checkout into `clone`, deleting anything not in the source
    async fn promote(&self, checkout: &Path, clone: &Path) -> Result<(), WorkerError> {
        info!(
            "Moving repo from {} to {}...",
            checkout.display(),
            clone.display()
        );
        tokio::fs::create_dir_all(clone)
            .await
            .map_err(|e| WorkerError::io(clone, e))?;

        // trailing slashes make rsync copy directory contents, not the directory
        let spec = CommandSpec::new("rsync")
            .arg("-a")
            .arg("--delete")
            .arg(format!("{}/", checkout.display()))
            .arg(format!("{}/", clone.display()));
        self.runner.run(&spec).await?;
        Ok(())
    }
}

/// Resolve `path` against the process working directory without touching
/// the filesystem
fn absolute(path: &Path) -> Result<PathBuf, WorkerError> {
    std::path::absolute(path).map_err(|e| WorkerError::io(path, e))
}

/// The repository name becomes a directory under the work dir, so it must be
/// a single plain path component.
fn validate_repo_name(name: &str) -> Result<(), WorkerError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(WorkerError::InvalidRepoName(name.to_string())),
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), WorkerError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o775))
        .await
        .map_err(|e| WorkerError::io(path, e))
}

#[cfg(not(unix))]
async fn make_executable(path: &Path) -> Result<(), WorkerError> {
    tokio::fs::metadata(path)
        .await
        .map(|_| ())
        .map_err(|e| WorkerError::io(path, e))
}
