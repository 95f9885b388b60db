use crate::config::non_empty_env;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Published,
    /// Nothing changed since the last publish.
    Unchanged,
}

/// Distribution channel for a written snapshot file.
#[async_trait::async_trait]
pub trait SnapshotPublisher: Send + Sync {
    fn channel_name(&self) -> &'static str;

    async fn publish(&self, snapshot_path: &Path, generated_at: &str) -> anyhow::Result<PublishOutcome>;
}

/// Commits the snapshot into a git checkout and pushes it.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    repo_dir: PathBuf,
    remote: Option<String>,
    branch: Option<String>,
}

impl GitPublisher {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: None,
            branch: None,
        }
    }

    /// Remote and branch come from `SNAPSHOT_GIT_REMOTE` / `SNAPSHOT_GIT_BRANCH`;
    /// unset means git's configured upstream.
    pub fn from_env(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote: non_empty_env("SNAPSHOT_GIT_REMOTE"),
            branch: non_empty_env("SNAPSHOT_GIT_BRANCH"),
            ..Self::new(repo_dir)
        }
    }

    pub fn commit_message(generated_at: &str) -> String {
        format!("chore: refresh indicator snapshot {generated_at}")
    }

    fn push_args(&self) -> Vec<String> {
        let mut args = vec!["push".to_string()];
        if let Some(remote) = &self.remote {
            args.push(remote.clone());
            if let Some(branch) = &self.branch {
                args.push(branch.clone());
            }
        }
        args
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run git {}", args.join(" ")))
    }

    async fn git_ok(&self, args: &[&str]) -> anyhow::Result<()> {
        let output = self.git(args).await?;
        if !output.status.success() {
            anyhow::bail!(
                "git {} failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotPublisher for GitPublisher {
    fn channel_name(&self) -> &'static str {
        "git"
    }

    /// `snapshot_path` is where the file was written, relative to the process
    /// working directory when not absolute; git sees it as an absolute path.
    async fn publish(&self, snapshot_path: &Path, generated_at: &str) -> anyhow::Result<PublishOutcome> {
        let path = std::fs::canonicalize(snapshot_path)
            .with_context(|| format!("snapshot {} not found", snapshot_path.display()))?;
        let path = path.to_string_lossy().into_owned();

        self.git_ok(&["add", "--", &path]).await?;

        // Exit status 0 means the staged tree matches HEAD for this path.
        let diff = self.git(&["diff", "--cached", "--quiet", "--", &path]).await?;
        if diff.status.success() {
            tracing::info!(path = %path, "snapshot unchanged; nothing to publish");
            return Ok(PublishOutcome::Unchanged);
        }

        let message = Self::commit_message(generated_at);
        self.git_ok(&["commit", "-m", &message, "--", &path]).await?;

        let push = self.push_args();
        let push: Vec<&str> = push.iter().map(String::as_str).collect();
        self.git_ok(&push).await?;

        tracing::info!(path = %path, repo = %self.repo_dir.display(), "snapshot published");
        Ok(PublishOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_carries_the_timestamp() {
        assert_eq!(
            GitPublisher::commit_message("2024-03-05 18:00:00"),
            "chore: refresh indicator snapshot 2024-03-05 18:00:00"
        );
    }

    #[test]
    fn push_uses_remote_and_branch_only_when_configured() {
        let mut publisher = GitPublisher::new("/tmp/repo");
        assert_eq!(publisher.push_args(), vec!["push"]);

        publisher.branch = Some("main".into());
        assert_eq!(publisher.push_args(), vec!["push"]);

        publisher.remote = Some("origin".into());
        assert_eq!(publisher.push_args(), vec!["push", "origin", "main"]);
    }

    fn git(dir: Option<&Path>, args: &[&str]) {
        let mut cmd = std::process::Command::new("git");
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        let out = cmd.args(args).output().unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    }

    fn head_subject(remote: &Path) -> String {
        let out = std::process::Command::new("git")
            .arg("--git-dir")
            .arg(remote)
            .args(["log", "-1", "--format=%s", "main"])
            .output()
            .unwrap();
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// Checkout at `<tmp>/site` with one commit, pushing to a bare `<tmp>/remote.git`.
    fn site_repo(tmp: &Path) -> (PathBuf, PathBuf) {
        let remote = tmp.join("remote.git");
        let repo = tmp.join("site");
        git(None, &["init", "--bare", &remote.to_string_lossy()]);
        git(None, &["init", &repo.to_string_lossy()]);
        git(Some(&repo), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(Some(&repo), &["config", "user.email", "bot@example.com"]);
        git(Some(&repo), &["config", "user.name", "bot"]);
        git(Some(&repo), &["config", "commit.gpgsign", "false"]);
        std::fs::write(repo.join("README.md"), b"site").unwrap();
        git(Some(&repo), &["add", "README.md"]);
        git(Some(&repo), &["commit", "-m", "init"]);
        git(Some(&repo), &["remote", "add", "origin", &remote.to_string_lossy()]);
        (repo, remote)
    }

    #[tokio::test]
    async fn publishes_a_snapshot_inside_the_repo_from_another_working_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let (repo, remote) = site_repo(tmp.path());
        assert_ne!(std::env::current_dir().unwrap(), repo);

        let publisher = GitPublisher {
            remote: Some("origin".into()),
            branch: Some("main".into()),
            ..GitPublisher::new(&repo)
        };
        let file = repo.join("public/static_data.json");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, br#"{"generated_at":"2024-03-05 18:00:00"}"#).unwrap();

        let outcome = publisher.publish(&file, "2024-03-05 18:00:00").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(
            head_subject(&remote),
            "chore: refresh indicator snapshot 2024-03-05 18:00:00"
        );

        let again = publisher.publish(&file, "2024-03-05 18:00:00").await.unwrap();
        assert_eq!(again, PublishOutcome::Unchanged);
    }

    #[tokio::test]
    async fn missing_snapshot_file_fails_before_running_git() {
        let tmp = tempfile::tempdir().unwrap();
        let publisher = GitPublisher::new(tmp.path());
        let err = publisher
            .publish(Path::new("public/static_data.json"), "t")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn publish_outside_a_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("static_data.json");
        std::fs::write(&file, b"{}").unwrap();

        let publisher = GitPublisher::new(dir.path());
        assert!(publisher.publish(&file, "t").await.is_err());
    }
}
