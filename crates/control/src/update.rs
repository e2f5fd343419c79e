use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tokio::process::Command,
    tracing::{debug, warn},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    /// The checkout is behind its upstream; `instructions` says how to update.
    Available { instructions: String },
}

impl UpdateStatus {
    pub fn render(&self) -> String {
        match self {
            Self::UpToDate => "✅ Bot is already on the latest version!".into(),
            Self::Available { instructions } => format!(
                "📦 *UPDATE AVAILABLE!*\n\nTo update, run on the server:\n```\n{instructions}\n```"
            ),
        }
    }
}

#[async_trait]
pub trait UpdateChecker: Send + Sync {
    async fn check(&self) -> Result<UpdateStatus>;
}

/// Compares a git checkout against its upstream.
#[derive(Debug, Clone)]
pub struct GitUpdateChecker {
    repo_dir: PathBuf,
    branch: String,
    timeout: Duration,
}

impl GitUpdateChecker {
    pub fn new(repo_dir: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            branch: branch.into(),
            timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn instructions(&self) -> String {
        format!(
            "cd {}\ngit pull origin {}\ncargo build --release\nherald run",
            self.repo_dir.display(),
            self.branch
        )
    }
}

#[async_trait]
impl UpdateChecker for GitUpdateChecker {
    async fn check(&self) -> Result<UpdateStatus> {
        git(&self.repo_dir, &["fetch", "origin"], self.timeout).await?;
        let status = git(&self.repo_dir, &["status", "-uno"], self.timeout).await?;
        if is_behind(&status) {
            Ok(UpdateStatus::Available {
                instructions: self.instructions(),
            })
        } else {
            Ok(UpdateStatus::UpToDate)
        }
    }
}

/// `git status` reports "Your branch is behind ..." when upstream has new commits.
fn is_behind(status: &str) -> bool {
    status.contains("behind")
}

async fn git(dir: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    debug!(dir = %dir.display(), ?args, "running git");

    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        },
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim())
        },
        Ok(Err(e)) => bail!("failed to run git: {e}"),
        Err(_) => {
            warn!(?args, "git timed out");
            bail!("git {} timed out after {}s", args.join(" "), timeout.as_secs())
        },
    }
}
