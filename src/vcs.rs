//! Version-control collaborator.
//!
//! Saves are committed best-effort; the sync engine logs a failed commit
//! and carries on. [`GitCli`] shells out to the `git` binary, [`NoVcs`]
//! stands in when committing is disabled or the root is not a work tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::Config;

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage and commit `path`. Returns the new commit id, or `None` when
    /// there was nothing to commit.
    async fn commit(&self, path: &str, message: &str) -> Result<Option<String>>;

    /// Last commit that touched `path`.
    async fn revision(&self, path: &str) -> Option<String>;
}

/// Pick the collaborator for a configured repository.
pub fn open_vcs(config: &Config) -> Arc<dyn VersionControl> {
    let root = &config.repo.root;
    if config.git.commit && root.join(".git").exists() {
        Arc::new(GitCli::new(root, config.git.author.clone()))
    } else {
        Arc::new(NoVcs)
    }
}

pub struct NoVcs;

#[async_trait]
impl VersionControl for NoVcs {
    async fn commit(&self, _path: &str, _message: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn revision(&self, _path: &str) -> Option<String> {
        None
    }
}

pub struct GitCli {
    root: PathBuf,
    author: Option<String>,
}

impl GitCli {
    pub fn new(root: &Path, author: Option<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            author,
        }
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn commit(&self, path: &str, message: &str) -> Result<Option<String>> {
        let output = self.git(&["add", "--", path]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git add failed: {}", stderr.trim());
        }

        // Exit status 0 means the index matches HEAD for this path.
        let output = self.git(&["diff", "--cached", "--quiet", "--", path]).await?;
        if output.status.success() {
            return Ok(None);
        }

        let author_arg = self.author.as_ref().map(|a| format!("--author={}", a));
        let mut args = vec!["commit", "-m", message];
        if let Some(arg) = &author_arg {
            args.push(arg);
        }
        args.extend(["--", path]);

        let output = self.git(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git commit failed: {}", stderr.trim());
        }

        let output = self.git(&["rev-parse", "HEAD"]).await?;
        if !output.status.success() {
            bail!("git rev-parse HEAD failed");
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    async fn revision(&self, path: &str) -> Option<String> {
        let output = self
            .git(&["log", "-1", "--format=%H", "--", path])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            None
        } else {
            Some(sha)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.name", "Wiki Bot"],
            vec!["config", "user.email", "bot@example.com"],
        ] {
            let status = StdCommand::new("git")
                .args(&args)
                .current_dir(dir)
                .status()
                .unwrap();
            assert!(status.success());
        }
    }

    #[tokio::test]
    async fn test_no_vcs_is_inert() {
        assert_eq!(NoVcs.commit("a.md", "msg").await.unwrap(), None);
        assert_eq!(NoVcs.revision("a.md").await, None);
    }

    #[tokio::test]
    async fn test_open_vcs_without_work_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::for_repo(tmp.path(), tmp.path().join("db.sqlite"));
        // Not a git work tree, so nothing is ever committed.
        let vcs = open_vcs(&config);
        assert_eq!(vcs.commit("a.md", "msg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_git_commit_and_revision() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::TempDir::new().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("page.md"), "# Page\n").unwrap();

        let git = GitCli::new(tmp.path(), None);
        assert_eq!(git.revision("page.md").await, None);

        let sha = git.commit("page.md", "Add page").await.unwrap();
        let sha = sha.expect("first commit produces a sha");
        assert_eq!(sha.len(), 40);
        assert_eq!(git.revision("page.md").await, Some(sha));

        // Unchanged file: nothing to commit.
        assert_eq!(git.commit("page.md", "Again").await.unwrap(), None);
    }
}
