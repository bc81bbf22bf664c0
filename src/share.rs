//! Shares per-developer files (env files, local config) between a
//! repository's worktrees by symlink or copy, following glob patterns.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::error::Result;

/// Link or copy files from `source` into `target` according to
/// `symlink_patterns`/`copy_patterns`. Idempotent: a file already present at
/// the destination is left untouched. Silent no-op if `source` doesn't
/// exist. `.git` is never traversed.
pub fn share_files(
    source: &Path,
    target: &Path,
    symlink_patterns: &[String],
    copy_patterns: &[String],
) -> Result<()> {
    if !source.exists() {
        return Ok(());
    }

    let mut files = Vec::new();
    collect_files(source, source, &mut files)?;

    for file in files {
        let should_symlink = symlink_patterns.iter().any(|p| glob_match(p, &file));
        let should_copy = !should_symlink && copy_patterns.iter().any(|p| glob_match(p, &file));

        if !should_symlink && !should_copy {
            continue;
        }

        let source_full = source.join(&file);
        let target_full = target.join(&file);

        if target_full.exists() || target_full.is_symlink() {
            continue;
        }

        if let Some(parent) = target_full.parent() {
            fs::create_dir_all(parent)?;
        }

        if should_symlink {
            symlink(&source_full, &target_full)?;
        } else {
            fs::copy(&source_full, &target_full)?;
        }
    }

    Ok(())
}

fn collect_files(dir: &Path, base: &Path, files: &mut Vec<String>) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }

        let relative = path.strip_prefix(base).unwrap_or(&path);
        let relative_str = relative.to_string_lossy().to_string();

        if path.is_dir() {
            collect_files(&path, base, files)?;
        } else {
            files.push(relative_str);
        }
    }
    Ok(())
}

/// Minimal glob matcher supporting `*` (within a path component boundary)
/// and `**` (any depth). Enough for env-file and directory-prefix patterns;
/// not a general glob implementation.
fn glob_match(pattern: &str, path: &str) -> bool {
    if pattern.contains("**") {
        let parts: Vec<&str> = pattern.splitn(2, "**").collect();
        if parts.len() == 2 {
            let prefix = parts[0].trim_end_matches('/');
            let suffix = parts[1].trim_start_matches('/');
            if !prefix.is_empty() && !path.starts_with(prefix) {
                return false;
            }
            if !suffix.is_empty() && !path.ends_with(suffix) {
                return false;
            }
            return true;
        }
    }

    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.splitn(2, '*').collect();
        if parts.len() == 2 {
            return path.starts_with(parts[0]) && path.ends_with(parts[1]);
        }
    }

    pattern == path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn symlinks_matching_files_and_skips_rest() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        fs::write(source.path().join(".env"), "SECRET=1").unwrap();
        fs::write(source.path().join("README.md"), "hi").unwrap();

        share_files(
            source.path(),
            target.path(),
            &[".env".to_string()],
            &[],
        )
        .unwrap();

        assert!(target.path().join(".env").is_symlink());
        assert!(!target.path().join("README.md").exists());
    }

    #[test]
    fn is_idempotent_when_target_already_exists() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        fs::write(source.path().join(".env"), "SECRET=1").unwrap();
        fs::write(target.path().join(".env"), "already here").unwrap();

        share_files(
            source.path(),
            target.path(),
            &[".env".to_string()],
            &[],
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(target.path().join(".env")).unwrap(),
            "already here"
        );
    }

    #[test]
    fn silently_does_nothing_if_source_is_missing() {
        let target = tempdir().unwrap();
        let result = share_files(
            Path::new("/nonexistent/source/path"),
            target.path(),
            &[".env".to_string()],
            &[],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn double_star_matches_nested_directory() {
        assert!(glob_match(".claude/**", ".claude/settings/local.json"));
        assert!(!glob_match(".claude/**", "other/settings/local.json"));
    }
}
