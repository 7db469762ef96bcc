#![forbid(unsafe_code)]

//! Git operations over the system `git` binary.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::core::github::GitHubClient;
use crate::error::CodeforgeError;

/// Repository side effects needed by the workflow.
///
/// The engine only talks to this trait; tests substitute an in-memory
/// implementation.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Clones `url` at `base_branch` into `dest`.
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        base_branch: &str,
    ) -> Result<(), CodeforgeError>;

    /// Creates and checks out a new branch.
    async fn create_branch(&self, workspace: &Path, branch: &str) -> Result<(), CodeforgeError>;

    /// Writes generated files relative to the workspace root.
    /// Returns the relative paths written.
    async fn write_files(
        &self,
        workspace: &Path,
        files: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, CodeforgeError>;

    /// Stages everything and commits. Returns the commit hash.
    async fn commit_all(&self, workspace: &Path, message: &str) -> Result<String, CodeforgeError>;

    /// Pushes the branch to origin with an upstream.
    async fn push(&self, workspace: &Path, branch: &str) -> Result<(), CodeforgeError>;

    /// Opens a pull request from `head` into `base`. Returns its URL.
    async fn create_pull_request(
        &self,
        repo_url: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, CodeforgeError>;
}

/// Thin wrapper over the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitClient {
    executable: String,
    user_name: String,
    user_email: String,
}

impl GitClient {
    #[must_use]
    pub fn new(executable: impl Into<String>, user_name: String, user_email: String) -> Self {
        Self {
            executable: executable.into(),
            user_name,
            user_email,
        }
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, CodeforgeError> {
        debug!(?args, "git");
        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CodeforgeError::GitNotFound
            } else {
                CodeforgeError::collaborator("git", e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodeforgeError::collaborator(
                "git",
                format!("git {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    /// Verifies the binary is on PATH.
    pub async fn version(&self) -> Result<String, CodeforgeError> {
        self.run(None, &["--version"]).await
    }

    pub async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        base_branch: &str,
    ) -> Result<(), CodeforgeError> {
        let dest_str = dest.to_string_lossy();
        self.run(
            None,
            &[
                "clone",
                "--branch",
                base_branch,
                "--single-branch",
                url,
                &dest_str,
            ],
        )
        .await?;
        // Commit identity for the workflow's own commits.
        self.run(Some(dest), &["config", "user.name", &self.user_name])
            .await?;
        self.run(Some(dest), &["config", "user.email", &self.user_email])
            .await?;
        Ok(())
    }

    pub async fn create_branch(
        &self,
        workspace: &Path,
        branch: &str,
    ) -> Result<(), CodeforgeError> {
        self.run(Some(workspace), &["checkout", "-b", branch])
            .await?;
        Ok(())
    }

    pub async fn commit_all(
        &self,
        workspace: &Path,
        message: &str,
    ) -> Result<String, CodeforgeError> {
        self.run(Some(workspace), &["add", "-A"]).await?;
        self.run(Some(workspace), &["commit", "-m", message])
            .await?;
        self.run(Some(workspace), &["rev-parse", "HEAD"]).await
    }

    pub async fn push(&self, workspace: &Path, branch: &str) -> Result<(), CodeforgeError> {
        self.run(Some(workspace), &["push", "-u", "origin", branch])
            .await?;
        Ok(())
    }

    pub async fn current_branch(&self, workspace: &Path) -> Result<String, CodeforgeError> {
        self.run(Some(workspace), &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
    }

    pub async fn origin_url(&self, workspace: &Path) -> Result<String, CodeforgeError> {
        self.run(Some(workspace), &["config", "--get", "remote.origin.url"])
            .await
    }

    /// Working-tree snapshot for diagnostics.
    pub async fn describe(&self, workspace: &Path) -> Result<RepoInfo, CodeforgeError> {
        let branch = self.current_branch(workspace).await?;
        let remote_url = self.origin_url(workspace).await.unwrap_or_default();
        let last_commit = self
            .run(Some(workspace), &["log", "-1", "--format=%H %s"])
            .await
            .unwrap_or_default();

        let mut info = RepoInfo {
            branch,
            remote_url,
            last_commit,
            modified: Vec::new(),
            staged: Vec::new(),
            untracked: Vec::new(),
        };
        let status = self
            .run(Some(workspace), &["status", "--porcelain"])
            .await?;
        for line in status.lines() {
            if line.len() < 4 {
                continue;
            }
            let (code, path) = line.split_at(2);
            let path = path.trim().to_owned();
            match (code.as_bytes()[0], code.as_bytes()[1]) {
                (b'?', b'?') => info.untracked.push(path),
                (b' ', _) => info.modified.push(path),
                (_, b' ') => info.staged.push(path),
                _ => {
                    info.staged.push(path.clone());
                    info.modified.push(path);
                }
            }
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepoInfo {
    pub branch: String,
    pub remote_url: String,
    pub last_commit: String,
    pub modified: Vec<String>,
    pub staged: Vec<String>,
    pub untracked: Vec<String>,
}

/// Default [`Repository`]: local git plus the hosting API for PRs.
pub struct GitRepository {
    git: GitClient,
    github: GitHubClient,
}

impl GitRepository {
    #[must_use]
    pub fn new(git: GitClient, github: GitHubClient) -> Self {
        Self { git, github }
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        base_branch: &str,
    ) -> Result<(), CodeforgeError> {
        self.git.clone_repo(url, dest, base_branch).await
    }

    async fn create_branch(&self, workspace: &Path, branch: &str) -> Result<(), CodeforgeError> {
        self.git.create_branch(workspace, branch).await
    }

    async fn write_files(
        &self,
        workspace: &Path,
        files: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, CodeforgeError> {
        let mut written = Vec::with_capacity(files.len());
        for (rel, content) in files {
            let path = workspace.join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| CodeforgeError::IoPath {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&path, content)
                .await
                .map_err(|source| CodeforgeError::IoPath {
                    path: path.clone(),
                    source,
                })?;
            written.push(rel.clone());
        }
        Ok(written)
    }

    async fn commit_all(&self, workspace: &Path, message: &str) -> Result<String, CodeforgeError> {
        self.git.commit_all(workspace, message).await
    }

    async fn push(&self, workspace: &Path, branch: &str) -> Result<(), CodeforgeError> {
        self.git.push(workspace, branch).await
    }

    async fn create_pull_request(
        &self,
        repo_url: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, CodeforgeError> {
        self.github
            .create_pull_request(repo_url, head, base, title, body)
            .await
    }
}
