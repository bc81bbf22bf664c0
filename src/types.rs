//! Shared types for grove

use serde::{Deserialize, Serialize};

/// Repository record from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub provider: String,
    pub username: String,
    pub name: String,
    pub clone_url: String,
    pub local_path: String,
    #[serde(rename = "type")]
    pub repo_type: Option<String>,
    pub default_branch: String,
    pub last_synced: i64,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

/// New repository for insertion
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub provider: String,
    pub username: String,
    pub name: String,
    pub clone_url: String,
    pub local_path: String,
    pub repo_type: String,
    pub default_branch: String,
    pub last_synced: i64,
}

/// Worktree record from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worktree {
    pub path: String,
    pub repo_id: String,
    pub branch: String,
    pub head: Option<String>,
    pub status: WorktreeStatus,
    pub commit_message: Option<String>,
    pub dirty: bool,
    pub ahead: i32,
    pub behind: i32,
    pub last_status_check: Option<i64>,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

/// New worktree for insertion
#[derive(Debug, Clone)]
pub struct NewWorktree {
    pub path: String,
    pub repo_id: String,
    pub branch: String,
    pub status: WorktreeStatus,
}

/// Worktree status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStatus {
    Creating,
    Ready,
    Error,
    Deleting,
}

impl WorktreeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Deleting => "deleting",
        }
    }
}

impl std::str::FromStr for WorktreeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            "deleting" => Ok(Self::Deleting),
            _ => anyhow::bail!("invalid worktree status: {}", s),
        }
    }
}

/// The reserved directory segment used for every repository's primary
/// worktree (the one carrying `default_branch`). Historically this was
/// `__main__`; current code uses `.main`.
pub const PRIMARY_SEGMENT: &str = ".main";

/// Worktree configuration. `symlink_patterns`/`copy_patterns` are stored as
/// comma-separated strings (the storage encoding is an implementation
/// detail); semantically they are ordered lists of glob patterns. A pattern
/// containing a literal comma cannot be round-tripped through this encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeConfig {
    pub repo_id: String,
    pub symlink_patterns: Option<String>,
    pub copy_patterns: Option<String>,
    pub upstream_remote: String,
}

impl WorktreeConfig {
    /// The conventional defaults applied to a freshly cloned repository:
    /// shares per-developer config files by symlink, copies nothing.
    pub fn defaults(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            symlink_patterns: Some(".env,.env.*,.claude/**".to_string()),
            copy_patterns: None,
            upstream_remote: "origin".to_string(),
        }
    }

    pub fn symlink_pattern_list(&self) -> Vec<String> {
        split_patterns(self.symlink_patterns.as_deref())
    }

    pub fn copy_pattern_list(&self) -> Vec<String> {
        split_patterns(self.copy_patterns.as_deref())
    }
}

fn split_patterns(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Git status for a worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitStatus {
    pub branch: String,
    pub head: Option<String>,
    pub dirty: bool,
    pub ahead: i32,
    pub behind: i32,
    pub commit_message: Option<String>,
}

/// Repository with its worktrees (for full state)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoWithWorktrees {
    #[serde(flatten)]
    pub repo: Repository,
    pub worktrees: Vec<Worktree>,
}

/// Parsed git URL components
#[derive(Debug, Clone)]
pub struct ParsedGitUrl {
    pub provider: String,
    pub username: String,
    pub name: String,
    pub url: String,
}
