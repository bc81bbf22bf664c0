//! Clone URL parsing and on-disk path derivation.
//!
//! A repository's `local_path` and a worktree's segment are both derived
//! deterministically from inputs that are otherwise free-form (a clone URL,
//! a branch name), so every derivation in this module is pure and total:
//! given the same input it always names the same path, and it never touches
//! the filesystem or the catalog.

use crate::error::{GroveError, Result};
use crate::types::{ParsedGitUrl, PRIMARY_SEGMENT};
use std::path::{Path, PathBuf};

/// Parse a clone URL into provider/username/name, accepting the SSH
/// (`git@host:user/repo.git`) and HTTPS (`https://host/user/repo.git`)
/// shapes. Anything else is `InvalidUrl`.
pub fn parse_clone_url(raw: &str) -> Result<ParsedGitUrl> {
    if let Some(rest) = raw.strip_prefix("git@") {
        let mut parts = rest.splitn(2, ':');
        let host = parts.next().unwrap_or("");
        let path = parts
            .next()
            .ok_or_else(|| GroveError::InvalidUrl(raw.to_string()))?;
        return build_parsed_url(raw, host, path);
    }

    if raw.starts_with("https://") || raw.starts_with("http://") {
        let parsed =
            url::Url::parse(raw).map_err(|_| GroveError::InvalidUrl(raw.to_string()))?;
        let host = parsed.host_str().unwrap_or("");
        let path = parsed.path().trim_start_matches('/');
        return build_parsed_url(raw, host, path);
    }

    Err(GroveError::InvalidUrl(raw.to_string()))
}

fn build_parsed_url(raw: &str, host: &str, path: &str) -> Result<ParsedGitUrl> {
    let path = path.trim_end_matches(".git");
    let mut segments = path.splitn(2, '/');
    let username = segments.next().unwrap_or("");
    let name = segments.next().unwrap_or("");

    if username.is_empty() || name.is_empty() {
        return Err(GroveError::InvalidUrl(raw.to_string()));
    }

    Ok(ParsedGitUrl {
        provider: extract_provider(host),
        username: username.to_string(),
        name: name.to_string(),
        url: raw.to_string(),
    })
}

fn extract_provider(host: &str) -> String {
    if host.contains("github") {
        "github".to_string()
    } else if host.contains("gitlab") {
        "gitlab".to_string()
    } else if host.contains("bitbucket") {
        "bitbucket".to_string()
    } else {
        host.split('.').next().unwrap_or("unknown").to_string()
    }
}

/// Where a repository's bare store lives: `<code_dir>/<username>/<name>`.
/// `provider` is recorded on the catalog row but does not appear in the
/// path — two providers hosting the same `<username>/<name>` pair collide
/// on disk.
pub fn repo_local_path(code_dir: &Path, parsed: &ParsedGitUrl) -> PathBuf {
    code_dir.join(&parsed.username).join(&parsed.name)
}

/// Map a branch name to its worktree directory segment. The default branch
/// always maps to [`PRIMARY_SEGMENT`]; every other branch is rewritten so
/// that it is a single safe path component: `..` becomes `__`, `/` becomes
/// `--`, and any other character outside `[A-Za-z0-9._-]` becomes `-`.
///
/// Unlike dropping disallowed characters, replacing them keeps distinct
/// branches (e.g. `feat/a` and `feat:a`) from colliding on the same segment.
pub fn branch_to_segment(branch: &str, default_branch: &str) -> String {
    if branch == default_branch {
        return PRIMARY_SEGMENT.to_string();
    }

    let replaced = branch.replace("..", "__").replace('/', "--");
    replaced
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Whether `segment` is the reserved primary-worktree segment.
pub fn is_primary_segment(segment: &str) -> bool {
    segment == PRIMARY_SEGMENT
}

/// Full path of a worktree: `<repo_local_path>/<segment>`, a direct child of
/// the repository directory alongside `.bare` and `.git`.
pub fn worktree_path(repo_local_path: &Path, segment: &str) -> PathBuf {
    repo_local_path.join(segment)
}

/// Whether `candidate` is strictly contained under `root` — defence in
/// depth against a branch-to-segment mapping that somehow still produces a
/// traversal, even though [`branch_to_segment`] already forbids it.
pub fn is_strictly_under(candidate: &Path, root: &Path) -> bool {
    candidate.starts_with(root) && candidate != root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_url() {
        let parsed = parse_clone_url("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(parsed.provider, "github");
        assert_eq!(parsed.username, "acme");
        assert_eq!(parsed.name, "widgets");
    }

    #[test]
    fn parses_https_url_without_dot_git_suffix() {
        let parsed = parse_clone_url("https://gitlab.com/acme/widgets").unwrap();
        assert_eq!(parsed.provider, "gitlab");
        assert_eq!(parsed.username, "acme");
        assert_eq!(parsed.name, "widgets");
    }

    #[test]
    fn rejects_url_without_owner_and_repo() {
        assert!(parse_clone_url("https://github.com/justonepath").is_err());
        assert!(parse_clone_url("not a url").is_err());
    }

    #[test]
    fn default_branch_maps_to_primary_segment() {
        assert_eq!(branch_to_segment("main", "main"), PRIMARY_SEGMENT);
    }

    #[test]
    fn branch_segment_replaces_slashes_and_traversal() {
        assert_eq!(branch_to_segment("feat/login", "main"), "feat--login");
        assert_eq!(branch_to_segment("../escape", "main"), "__--escape");
    }

    #[test]
    fn distinct_branches_do_not_collide_after_replacement() {
        let a = branch_to_segment("feat/a", "main");
        let b = branch_to_segment("feat:a", "main");
        assert_ne!(a, b);
    }

    #[test]
    fn local_path_omits_provider_segment() {
        let parsed = parse_clone_url("git@github.com:alice/widgets.git").unwrap();
        let path = repo_local_path(Path::new("/code"), &parsed);
        assert_eq!(path, Path::new("/code/alice/widgets"));
    }
}
