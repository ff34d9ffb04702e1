//! GitOps working tree
//!
//! The controller owns exactly one checkout of the GitOps repository. Access
//! goes through [`WorkingTreeGate::open`], which hands out a
//! [`GitWorkingTree`] holding the gate's lock; a second `open` waits until
//! the first handle is closed or dropped.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::models::deployment::CommitInfo;
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Remote operations fail instead of waiting for credentials on a terminal
const NO_PROMPT: (&str, &str) = ("GIT_TERMINAL_PROMPT", "0");

static COMMIT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\bcommit\s+([0-9a-f]{7,64})\b").expect("commit pattern is valid")
});

/// Author identity used for generated commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Where the repository lives and how to reach it
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub remote_url: String,
    pub local_path: PathBuf,
    pub branch: String,
    pub identity: GitIdentity,

    /// Applied to network-bound git commands (clone, pull, push)
    pub timeout: Option<Duration>,
}

impl RepositoryConfig {
    pub fn from_settings(settings: &Settings, layout: &StorageLayout) -> Self {
        let repo = &settings.repository;
        Self {
            remote_url: repo.url.clone(),
            local_path: repo
                .local_path
                .clone()
                .unwrap_or_else(|| layout.repository_dir().path().to_path_buf()),
            branch: repo.branch.clone(),
            identity: GitIdentity {
                name: repo.author_name.clone(),
                email: repo.author_email.clone(),
            },
            timeout: Some(Duration::from_secs(repo.timeout_secs)),
        }
    }
}

/// Kind of change a generated commit records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Creation,
    Update,
    Deletion,
}

impl CommitKind {
    fn verb(&self) -> &'static str {
        match self {
            CommitKind::Creation => "created",
            CommitKind::Update => "updated",
            CommitKind::Deletion => "deleted",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            CommitKind::Creation => {
                "The manifests of a new application deployment were rendered from its \
                 template and configuration. The GitOps reconciler will create the \
                 namespace and its resources."
            }
            CommitKind::Update => {
                "The manifests of an existing application deployment were regenerated \
                 from its template and current configuration. The GitOps reconciler \
                 will roll out the changes."
            }
            CommitKind::Deletion => {
                "The manifests of an application deployment were removed. The GitOps \
                 reconciler will prune the namespace and its resources."
            }
        }
    }

    /// First line of the commit message
    pub fn subject(&self, uuid: &str) -> String {
        format!("autodeploy({}): application deployment {}", uuid, self.verb())
    }

    /// Full commit message
    pub fn message(&self, uuid: &str) -> String {
        format!("{}\n\n{}", self.subject(uuid), self.body())
    }
}

/// Extract the first commit hash from `git log` output
pub fn extract_commit_hash(log: &str) -> Option<String> {
    COMMIT_LINE
        .captures_iter(log)
        .next()
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Serializes access to the single repository checkout
pub struct WorkingTreeGate {
    config: RepositoryConfig,
    runner: Arc<dyn ProcessRunner>,
    lock: Arc<Mutex<()>>,
}

impl WorkingTreeGate {
    pub fn new(config: RepositoryConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Wait for exclusive access, then clone or pull the checkout
    pub async fn open(&self) -> Result<GitWorkingTree, ControlError> {
        let guard = self.lock.clone().lock_owned().await;
        debug!("Opened working tree at {}", self.config.local_path.display());

        let tree = GitWorkingTree {
            config: self.config.clone(),
            runner: self.runner.clone(),
            guard: Some(guard),
        };
        tree.sync().await?;
        Ok(tree)
    }
}

/// An open handle on the repository checkout
pub struct GitWorkingTree {
    config: RepositoryConfig,
    runner: Arc<dyn ProcessRunner>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl GitWorkingTree {
    pub fn is_open(&self) -> bool {
        self.guard.is_some()
    }

    /// Root of the checkout
    pub fn path(&self) -> Result<&Path, ControlError> {
        self.ensure_open()?;
        Ok(&self.config.local_path)
    }

    /// Commit everything in the working tree and push it.
    ///
    /// Empty commits are allowed, so regenerating identical manifests still
    /// yields a commit to record.
    pub async fn push(&mut self, uuid: &str, kind: CommitKind) -> Result<CommitInfo, ControlError> {
        self.ensure_open()?;
        let message = kind.message(uuid);
        let subject = kind.subject(uuid);
        let branch = self.config.branch.as_str();

        self.git(&["add", "--all"], false)
            .await
            .map_err(ControlError::GenerationFailed)?;
        self.git(
            &[
                "commit",
                "--allow-empty",
                "-m",
                subject.as_str(),
                "-m",
                kind.body(),
            ],
            false,
        )
        .await
        .map_err(ControlError::GenerationFailed)?;
        self.git(&["push", "origin", branch], true)
            .await
            .map_err(ControlError::GenerationFailed)?;

        let log = self
            .git(&["log", "-n", "1"], false)
            .await
            .map_err(ControlError::GenerationFailed)?;
        let hash = extract_commit_hash(&log.stdout).ok_or_else(|| {
            ControlError::GenerationFailed(format!(
                "No commit hash in git log output: {}",
                log.stdout.trim()
            ))
        })?;

        info!("Pushed {} ({})", subject, hash);
        Ok(CommitInfo { message, hash })
    }

    /// Release the handle; the checkout stays on disk
    pub fn close(&mut self) {
        if self.guard.take().is_some() {
            debug!("Closed working tree at {}", self.config.local_path.display());
        }
    }

    fn ensure_open(&self) -> Result<(), ControlError> {
        if self.guard.is_none() {
            return Err(ControlError::IllegalState(
                "working tree handle is closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), ControlError> {
        if self.is_repository().await {
            self.configure_identity().await?;
            debug!("Pulling branch {}", self.config.branch);
            self.git(&["pull", "origin", self.config.branch.as_str()], true)
                .await
                .map_err(ControlError::RepositoryUnavailable)?;
            return Ok(());
        }

        let local = Dir::new(&self.config.local_path);
        if local.exists().await {
            warn!(
                "Discarding non-repository directory at {}",
                self.config.local_path.display()
            );
        }
        local.delete().await?;
        if let Some(parent) = self.config.local_path.parent() {
            Dir::new(parent).create().await?;
        }

        info!(
            "Cloning {} (branch: {}) to {}",
            self.config.remote_url,
            self.config.branch,
            self.config.local_path.display()
        );
        let clone = CommandSpec::new("git")
            .args(["clone", "--branch"])
            .arg(self.config.branch.as_str())
            .arg(self.config.remote_url.as_str())
            .arg(self.config.local_path.to_string_lossy())
            .env(NO_PROMPT.0, NO_PROMPT.1)
            .timeout(self.config.timeout);
        self.runner
            .run(&clone)
            .await
            .map_err(|e| ControlError::RepositoryUnavailable(e.to_string()))?
            .check(&clone)
            .map_err(ControlError::RepositoryUnavailable)?;

        self.configure_identity().await
    }

    async fn is_repository(&self) -> bool {
        if !Dir::new(self.config.local_path.join(".git")).exists().await {
            return false;
        }
        match self.git(&["rev-parse", "--is-inside-work-tree"], false).await {
            Ok(output) => output.stdout.trim() == "true",
            Err(_) => false,
        }
    }

    async fn configure_identity(&self) -> Result<(), ControlError> {
        let identity = &self.config.identity;
        self.git(&["config", "user.name", identity.name.as_str()], false)
            .await
            .map_err(ControlError::RepositoryUnavailable)?;
        self.git(&["config", "user.email", identity.email.as_str()], false)
            .await
            .map_err(ControlError::RepositoryUnavailable)?;
        Ok(())
    }

    /// Run git inside the checkout; failures come back as a message
    async fn git(&self, args: &[&str], remote: bool) -> Result<ProcessOutput, String> {
        let mut command = CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(&self.config.local_path);
        if remote {
            command = command
                .env(NO_PROMPT.0, NO_PROMPT.1)
                .timeout(self.config.timeout);
        }
        self.runner
            .run(&command)
            .await
            .map_err(|e| e.to_string())?
            .check(&command)
    }
}

impl Drop for GitWorkingTree {
    fn drop(&mut self) {
        self.close();
    }
}
