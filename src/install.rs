//! Package manager detection and dependency installation for a freshly
//! created worktree.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{GroveError, Result};

/// A JavaScript package manager, detected from lockfile presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Bun,
    Pnpm,
    Yarn,
    Npm,
}

impl PackageManager {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Bun => "bun",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Npm => "npm",
        }
    }

    pub fn install_args(&self) -> &'static [&'static str] {
        &["install"]
    }
}

/// Detect the package manager for a worktree, trying lockfiles in order:
/// bun, pnpm, yarn, npm (via `package-lock.json`), then npm again if only a
/// bare `package.json` is present. Returns `None` if there's no JS project
/// here at all.
pub fn detect_package_manager(path: &Path) -> Option<PackageManager> {
    if path.join("bun.lock").exists() || path.join("bun.lockb").exists() {
        Some(PackageManager::Bun)
    } else if path.join("pnpm-lock.yaml").exists() {
        Some(PackageManager::Pnpm)
    } else if path.join("yarn.lock").exists() {
        Some(PackageManager::Yarn)
    } else if path.join("package-lock.json").exists() {
        Some(PackageManager::Npm)
    } else if path.join("package.json").exists() {
        Some(PackageManager::Npm)
    } else {
        None
    }
}

/// Run `<pm> install` in `path`, streaming the last non-empty line of each
/// stdout/stderr chunk to `on_progress` as a rolling status.
pub async fn run_install<F>(path: &Path, pm: PackageManager, mut on_progress: F) -> Result<()>
where
    F: FnMut(&str),
{
    let mut cmd = Command::new(pm.command());
    cmd.args(pm.install_args())
        .current_dir(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut last_line = String::new();

    loop {
        tokio::select! {
            line = stdout_lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        last_line = line.clone();
                        on_progress(&line);
                    }
                    Some(_) => {}
                    None => {}
                }
            }
            line = stderr_lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        last_line = line.clone();
                        on_progress(&line);
                    }
                    Some(_) => {}
                    None => {}
                }
            }
            status = child.wait() => {
                let status = status?;
                while let Ok(Some(line)) = stdout_lines.next_line().await {
                    if !line.trim().is_empty() {
                        last_line = line.clone();
                        on_progress(&line);
                    }
                }
                while let Ok(Some(line)) = stderr_lines.next_line().await {
                    if !line.trim().is_empty() {
                        last_line = line.clone();
                        on_progress(&line);
                    }
                }

                if !status.success() {
                    return Err(GroveError::Internal(format!(
                        "{} {} failed: {}",
                        pm.command(),
                        pm.install_args().join(" "),
                        last_line
                    )));
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_bun_before_other_lockfiles() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bun.lock"), "").unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "").unwrap();
        assert_eq!(detect_package_manager(dir.path()), Some(PackageManager::Bun));
    }

    #[test]
    fn falls_back_to_npm_for_bare_package_json() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_package_manager(dir.path()), Some(PackageManager::Npm));
    }

    #[test]
    fn detects_yarn_lockfile() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(detect_package_manager(dir.path()), Some(PackageManager::Yarn));
    }

    #[test]
    fn no_lockfile_or_manifest_means_no_installer() {
        let dir = tempdir().unwrap();
        assert_eq!(detect_package_manager(dir.path()), None);
    }
}
