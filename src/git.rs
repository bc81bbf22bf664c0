//! Git executor: every operation shells out to the `git` binary as a child
//! process rather than linking a git implementation. Output classification
//! is uniform across operations because it all goes through [`run`]:
//! non-zero exit becomes [`GroveError::GitFailed`] carrying the op name,
//! exit code, and captured stderr, and stdout/stderr lines are streamed to
//! a progress callback as they arrive instead of buffered until exit.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{GroveError, Result};
use crate::types::GitStatus;

/// A line of output from a running git child process, together with which
/// stream it came from. Consumers use this to surface clone/fetch progress
/// (git reports most of its progress on stderr).
pub struct GitLine {
    pub line: String,
    pub is_stderr: bool,
}

pub type ProgressFn<'a> = dyn FnMut(GitLine) + Send + 'a;

/// Stateless git executor; all state lives in the filesystem it operates on.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitExecutor;

impl GitExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Clone `url` as a bare repository at `bare_path`, streaming progress
    /// lines to `on_progress` as git emits them.
    pub async fn clone_bare(
        &self,
        url: &str,
        bare_path: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        self.run_streaming(
            "clone",
            None,
            &[
                "clone",
                "--bare",
                "--progress",
                url,
                &bare_path.to_string_lossy(),
            ],
            on_progress,
        )
        .await
    }

    /// Point a worktree's `.git` file at the bare store and configure the
    /// fetch refspec so `git fetch` inside the bare repo populates
    /// `refs/remotes/<remote>/*` (a plain `--bare` clone otherwise leaves
    /// the fetch refspec empty).
    pub async fn configure_fetch_refspec(&self, bare_path: &Path, remote: &str) -> Result<()> {
        self.run(
            "config",
            Some(bare_path),
            &[
                "config",
                &format!("remote.{remote}.fetch"),
                &format!("+refs/heads/*:refs/remotes/{remote}/*"),
            ],
        )
        .await
        .map(|_| ())
    }

    pub async fn fetch(
        &self,
        bare_path: &Path,
        remote: &str,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        self.run_streaming(
            "fetch",
            Some(bare_path),
            &["fetch", "--progress", remote],
            on_progress,
        )
        .await
    }

    pub async fn pull(&self, worktree_path: &Path, on_progress: &mut ProgressFn<'_>) -> Result<()> {
        self.run_streaming(
            "pull",
            Some(worktree_path),
            &["pull", "--ff-only", "--progress"],
            on_progress,
        )
        .await
    }

    /// Determine the default branch via the remote's symbolic HEAD, falling
    /// back to `main` if the remote never set one (common for freshly
    /// initialized empty repositories).
    pub async fn detect_default_branch(&self, bare_path: &Path, remote: &str) -> Result<String> {
        let ref_name = format!("refs/remotes/{remote}/HEAD");
        let output = self
            .run(
                "symbolic-ref",
                Some(bare_path),
                &["symbolic-ref", &ref_name, "--short"],
            )
            .await;

        let prefix = format!("{remote}/");
        match output {
            Ok(stdout) => {
                let branch = stdout.trim().strip_prefix(&prefix).unwrap_or(stdout.trim());
                if branch.is_empty() {
                    Ok("main".to_string())
                } else {
                    Ok(branch.to_string())
                }
            }
            Err(_) => Ok("main".to_string()),
        }
    }

    /// Create a worktree at `worktree_path` checked out to `branch`,
    /// choosing among three cases: the local branch already exists, only a
    /// remote-tracking branch exists, or neither exists and a new branch is
    /// created from the current HEAD.
    pub async fn create_worktree(
        &self,
        bare_path: &Path,
        worktree_path: &Path,
        branch: &str,
        remote: &str,
    ) -> Result<()> {
        let local_ref = format!("refs/heads/{branch}");
        let remote_ref = format!("{remote}/{branch}");
        let remote_full_ref = format!("refs/remotes/{remote_ref}");

        let local_exists = self.ref_exists(bare_path, &local_ref).await?;
        let remote_exists = self.ref_exists(bare_path, &remote_full_ref).await?;
        let worktree_path_str = worktree_path.to_string_lossy().to_string();

        if local_exists {
            self.run(
                "worktree add",
                Some(bare_path),
                &["worktree", "add", &worktree_path_str, branch],
            )
            .await?;

            if remote_exists {
                let _ = self
                    .run(
                        "branch --set-upstream-to",
                        Some(worktree_path),
                        &["branch", "--set-upstream-to", &remote_ref, branch],
                    )
                    .await;
            }
        } else if remote_exists {
            self.run(
                "worktree add",
                Some(bare_path),
                &[
                    "worktree",
                    "add",
                    "--track",
                    "-b",
                    branch,
                    &worktree_path_str,
                    &remote_ref,
                ],
            )
            .await?;
        } else {
            self.run(
                "worktree add",
                Some(bare_path),
                &["worktree", "add", "-b", branch, &worktree_path_str],
            )
            .await?;
        }

        Ok(())
    }

    pub async fn remove_worktree(&self, bare_path: &Path, worktree_path: &Path) -> Result<()> {
        self.run(
            "worktree remove",
            Some(bare_path),
            &[
                "worktree",
                "remove",
                &worktree_path.to_string_lossy(),
                "--force",
            ],
        )
        .await?;
        Ok(())
    }

    /// Current branch, HEAD commit, first line of the commit message, dirty
    /// flag, and ahead/behind counts relative to `<remote>/<branch>`.
    pub async fn get_status(&self, worktree_path: &Path, remote: &str) -> Result<GitStatus> {
        let branch = self
            .run(
                "rev-parse",
                Some(worktree_path),
                &["rev-parse", "--abbrev-ref", "HEAD"],
            )
            .await?
            .trim()
            .to_string();

        let head = self
            .run("rev-parse", Some(worktree_path), &["rev-parse", "HEAD"])
            .await
            .ok()
            .map(|s| s.trim().to_string());

        let commit_message = self
            .run(
                "log",
                Some(worktree_path),
                &["log", "-1", "--pretty=%s"],
            )
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let dirty = !self
            .run(
                "status --porcelain",
                Some(worktree_path),
                &["status", "--porcelain"],
            )
            .await?
            .trim()
            .is_empty();

        let (ahead, behind) = self
            .run(
                "rev-list",
                Some(worktree_path),
                &[
                    "rev-list",
                    "--left-right",
                    "--count",
                    &format!("{remote}/{branch}...HEAD"),
                ],
            )
            .await
            .ok()
            .and_then(|output| {
                let parts: Vec<&str> = output.trim().split_whitespace().collect();
                if parts.len() == 2 {
                    Some((parts[1].parse().unwrap_or(0), parts[0].parse().unwrap_or(0)))
                } else {
                    None
                }
            })
            .unwrap_or((0, 0));

        Ok(GitStatus {
            branch,
            head,
            dirty,
            ahead,
            behind,
            commit_message,
        })
    }

    /// Whether a local branch (not a remote-tracking ref) exists.
    pub async fn branch_exists(&self, bare_path: &Path, branch: &str) -> Result<bool> {
        self.ref_exists(bare_path, &format!("refs/heads/{branch}"))
            .await
    }

    /// Force-delete a local branch ref. Used only to recreate it with
    /// proper upstream tracking right after a bare clone.
    pub async fn delete_local_branch(&self, bare_path: &Path, branch: &str) -> Result<()> {
        self.run("branch -D", Some(bare_path), &["branch", "-D", branch])
            .await?;
        Ok(())
    }

    async fn ref_exists(&self, cwd: &Path, refspec: &str) -> Result<bool> {
        let status = Command::new("git")
            .args(["rev-parse", "--verify", refspec])
            .current_dir(cwd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    /// Run a git command to completion, returning captured stdout.
    async fn run(&self, op: &str, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(GroveError::git_failed(
                op,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a git command, streaming stdout and stderr lines to `on_progress`
    /// as they arrive instead of waiting for exit, and capturing stderr in
    /// full for inclusion in `GitFailed` if the command ends up failing.
    async fn run_streaming(
        &self,
        op: &str,
        cwd: Option<&Path>,
        args: &[&str],
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut captured_stderr = String::new();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line? {
                        Some(line) => on_progress(GitLine { line, is_stderr: false }),
                        None => {}
                    }
                }
                line = stderr_lines.next_line() => {
                    match line? {
                        Some(line) => {
                            captured_stderr.push_str(&line);
                            captured_stderr.push('\n');
                            on_progress(GitLine { line, is_stderr: true });
                        }
                        None => {}
                    }
                }
                status = child.wait() => {
                    let status = status?;
                    // Drain whatever is left on both streams before reporting.
                    while let Ok(Some(line)) = stdout_lines.next_line().await {
                        on_progress(GitLine { line, is_stderr: false });
                    }
                    while let Ok(Some(line)) = stderr_lines.next_line().await {
                        captured_stderr.push_str(&line);
                        captured_stderr.push('\n');
                        on_progress(GitLine { line, is_stderr: true });
                    }

                    if status.success() {
                        return Ok(());
                    }
                    return Err(GroveError::git_failed(
                        op,
                        status.code().unwrap_or(-1),
                        captured_stderr,
                    ));
                }
            }
        }
    }
}
