//! Lifecycle engine: orchestrates clone, worktree create/delete, repository
//! delete, and refresh. Every public operation validates synchronously and
//! returns an acknowledgement immediately; the slow work — git, the
//! installer, the filesystem — runs on a spawned background task and is
//! observable only through the state broadcaster's snapshot stream.
//!
//! This is the piece of the original HTTP-handler-embedded clone/worktree
//! logic generalized into something transport-agnostic: handlers used to
//! `tokio::spawn` this work directly with no de-duplication; here the
//! engine owns the spawn and the shared main-sync de-duplication described
//! in [`Self::ensure_main_synced`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{GroveError, Result};
use crate::git::GitExecutor;
use crate::install;
use crate::share;
use crate::state::StateManager;
use crate::types::{NewRepository, NewWorktree, Repository, WorktreeConfig, WorktreeStatus, PRIMARY_SEGMENT};
use crate::url;
use crate::Config;
use crate::Database;

/// Delay between a status-visibility broadcast and the start of blocking
/// work in delete paths, so subscribers observe the intermediate state
/// before it disappears ("show-then-do").
const SHOW_THEN_DO_DELAY: Duration = Duration::from_millis(100);

const UPSTREAM_REMOTE: &str = "origin";

pub struct LifecycleEngine {
    db: Arc<Database>,
    git: GitExecutor,
    state: Arc<StateManager>,
    config: Config,
    sync_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    last_synced_at: Mutex<HashMap<String, Instant>>,
}

impl LifecycleEngine {
    pub fn new(db: Arc<Database>, state: Arc<StateManager>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            db,
            git: GitExecutor::new(),
            state,
            config,
            sync_locks: Mutex::new(HashMap::new()),
            last_synced_at: Mutex::new(HashMap::new()),
        })
    }

    // ─────────────────────────────────────────────────────────────
    // Clone
    // ─────────────────────────────────────────────────────────────

    /// Start cloning `url` as a bare repository. Returns once the url has
    /// been parsed and checked for a catalog conflict; the rest runs in the
    /// background.
    pub async fn clone(self: &Arc<Self>, url_str: &str) -> Result<()> {
        let parsed = url::parse_clone_url(url_str)?;
        let local_path = url::repo_local_path(&self.config.code_dir, &parsed);
        let local_path_str = local_path.to_string_lossy().to_string();

        let progress_key = format!("clone:{url_str}");
        self.state
            .set_progress(&progress_key, Some("Cloning repository…"));

        if self.db.get_repository_by_path(&local_path_str)?.is_some() {
            self.state.set_progress(&progress_key, None);
            return Err(GroveError::Conflict(format!(
                "repository already exists at {local_path_str}"
            )));
        }

        let engine = Arc::clone(self);
        let url_owned = url_str.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine
                .run_clone(url_owned.clone(), parsed, local_path)
                .await
            {
                tracing::error!("clone of {} failed: {}", url_owned, e);
            }
        });

        Ok(())
    }

    async fn run_clone(
        self: Arc<Self>,
        url_str: String,
        parsed: crate::types::ParsedGitUrl,
        local_path: PathBuf,
    ) -> Result<()> {
        let progress_key = format!("clone:{url_str}");
        let mut repo_id: Option<String> = None;

        let result: Result<()> = async {
            // Step 4: a stray directory left from a previous failed clone
            // is cleaned only because we are about to create it fresh —
            // the catalog conflict check above already proved no live
            // repository owns this path.
            if local_path.exists() {
                tokio::fs::remove_dir_all(&local_path).await.ok();
            }
            tokio::fs::create_dir_all(&local_path).await?;

            let bare_path = local_path.join(".bare");
            let progress_key = progress_key.clone();
            let mut on_progress = |line: crate::git::GitLine| {
                self.state.set_progress(&progress_key, Some(&line.line));
            };
            self.git
                .clone_bare(&url_str, &bare_path, &mut on_progress)
                .await?;

            // Step 5: gitdir pointer + fetch refspec + fetch.
            tokio::fs::write(local_path.join(".git"), "gitdir: ./.bare\n").await?;
            self.git
                .configure_fetch_refspec(&bare_path, UPSTREAM_REMOTE)
                .await?;
            let mut on_progress = |line: crate::git::GitLine| {
                self.state.set_progress(&progress_key, Some(&line.line));
            };
            self.git
                .fetch(&bare_path, UPSTREAM_REMOTE, &mut on_progress)
                .await?;

            // Step 6: default branch, falling back to "main".
            let default_branch = self
                .git
                .detect_default_branch(&bare_path, UPSTREAM_REMOTE)
                .await
                .unwrap_or_else(|_| "main".to_string());

            // Step 7: insert the repository row, switch progress key.
            let id = self.db.insert_repository(&NewRepository {
                provider: parsed.provider.clone(),
                username: parsed.username.clone(),
                name: parsed.name.clone(),
                clone_url: url_str.clone(),
                local_path: local_path.to_string_lossy().to_string(),
                repo_type: "bare".to_string(),
                default_branch: default_branch.clone(),
                last_synced: 0,
            })?;
            repo_id = Some(id.clone());
            self.state.set_progress(&progress_key, None);
            self.state
                .set_progress(&id, Some("Cloning repository…"));
            self.state.on_db_change();

            // Step 8: insert the primary worktree row.
            let primary_path = local_path.join(PRIMARY_SEGMENT);
            self.db.insert_worktree(&NewWorktree {
                path: primary_path.to_string_lossy().to_string(),
                repo_id: id.clone(),
                branch: default_branch.clone(),
                status: WorktreeStatus::Creating,
            })?;
            self.state.on_db_change();

            // Step 9: a plain `--bare` clone already has `refs/heads/<default>`
            // but it doesn't track origin; drop it and recreate tracking.
            if self
                .git
                .branch_exists(&bare_path, &default_branch)
                .await
                .unwrap_or(false)
            {
                self.git
                    .delete_local_branch(&bare_path, &default_branch)
                    .await
                    .ok();
            }
            self.git
                .create_worktree(&bare_path, &primary_path, &default_branch, UPSTREAM_REMOTE)
                .await?;

            // Step 10: warm the dependency cache. A failed install is
            // downgraded to a warning — a ready-but-cold repo is acceptable.
            if let Some(pm) = install::detect_package_manager(&primary_path) {
                let progress_key = id.clone();
                if let Err(e) = install::run_install(&primary_path, pm, |line| {
                    self.state.set_progress(&progress_key, Some(line));
                })
                .await
                {
                    tracing::warn!("install during clone of {} failed: {}", url_str, e);
                }
            }

            // Step 11: status, mark ready.
            let status = self.git.get_status(&primary_path, UPSTREAM_REMOTE).await?;
            self.db.update_worktree_status(
                &primary_path.to_string_lossy(),
                WorktreeStatus::Ready,
                status.head.as_deref(),
                status.commit_message.as_deref(),
            )?;
            self.db.update_worktree_git_status(
                &primary_path.to_string_lossy(),
                status.dirty,
                status.ahead,
                status.behind,
            )?;

            // Step 12: conventional defaults for the file sharer.
            self.db
                .upsert_worktree_config(&WorktreeConfig::defaults(id.clone()))?;

            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                if let Some(id) = &repo_id {
                    self.state.set_progress(id, None);
                }
                self.state.set_progress(&progress_key, None);
                self.state.on_db_change();
                Ok(())
            }
            Err(e) => {
                self.state.set_progress(&progress_key, None);
                if let Some(id) = &repo_id {
                    self.state.set_progress(id, None);
                    self.db.delete_repository(id).ok();
                }
                tokio::fs::remove_dir_all(&local_path).await.ok();
                self.state.on_db_change();
                Err(e)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Shared main-sync (§4.5.3)
    // ─────────────────────────────────────────────────────────────

    /// Ensure the primary worktree is fetched, pulled, and has a warm
    /// dependency cache — at most once per [`Config::sync_cooldown`], and at
    /// most one concurrent sync per repository regardless of how many
    /// worktree creations race for it. Progress is published under
    /// `requester_progress_key` (the calling worktree's own path), not the
    /// repository id, so concurrent requesters each see their own status
    /// instead of clobbering one another's.
    async fn ensure_main_synced(&self, repo: &Repository, requester_progress_key: &str) {
        if let Some(last) = self.last_synced_at.lock().unwrap().get(&repo.id) {
            if last.elapsed() < self.config.sync_cooldown {
                self.state
                    .set_progress(requester_progress_key, Some("Sync cached"));
                return;
            }
        }

        let lock = {
            let mut locks = self.sync_locks.lock().unwrap();
            Arc::clone(
                locks
                    .entry(repo.id.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        match lock.clone().try_lock_owned() {
            Ok(_guard) => {
                self.state
                    .set_progress(requester_progress_key, Some("Syncing main worktree…"));
                self.run_main_sync(repo).await;
                self.last_synced_at
                    .lock()
                    .unwrap()
                    .insert(repo.id.clone(), Instant::now());
                self.sync_locks.lock().unwrap().remove(&repo.id);
            }
            Err(_) => {
                self.state
                    .set_progress(requester_progress_key, Some("Waiting for sync…"));
                let _guard = lock.lock().await;
            }
        }
    }

    async fn run_main_sync(&self, repo: &Repository) {
        let bare_path = Path::new(&repo.local_path);
        let primary_path = bare_path.join(PRIMARY_SEGMENT);

        let mut on_progress = |_line: crate::git::GitLine| {};
        if let Err(e) = self.git.fetch(bare_path, UPSTREAM_REMOTE, &mut on_progress).await {
            tracing::warn!("main-sync fetch failed for {}: {}", repo.name, e);
        }

        let mut on_progress = |_line: crate::git::GitLine| {};
        if let Err(e) = self.git.pull(&primary_path, &mut on_progress).await {
            tracing::warn!("main-sync pull failed for {}: {}", repo.name, e);
        }

        if let Some(pm) = install::detect_package_manager(&primary_path) {
            if let Err(e) = install::run_install(&primary_path, pm, |_| {}).await {
                tracing::warn!("main-sync install failed for {}: {}", repo.name, e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Create worktree (§4.5.4)
    // ─────────────────────────────────────────────────────────────

    pub async fn create_worktree(self: &Arc<Self>, repo_id: &str, branch: &str) -> Result<()> {
        let repo = self
            .db
            .get_repository(repo_id)?
            .ok_or_else(|| GroveError::NotFound(format!("repository {repo_id}")))?;

        let branch = branch.trim();
        if branch.is_empty() || branch.chars().all(|c| c == '.') {
            return Err(GroveError::InvalidBranch(branch.to_string()));
        }

        let segment = url::branch_to_segment(branch, &repo.default_branch);
        let local_path = PathBuf::from(&repo.local_path);
        let worktree_path = url::worktree_path(&local_path, &segment);

        if !url::is_strictly_under(&worktree_path, &local_path) {
            return Err(GroveError::InvalidBranch(branch.to_string()));
        }

        let worktree_path_str = worktree_path.to_string_lossy().to_string();
        if self.db.get_worktree(&worktree_path_str)?.is_some() {
            return Err(GroveError::Conflict(format!(
                "worktree already exists at {worktree_path_str}"
            )));
        }

        self.db.insert_worktree(&NewWorktree {
            path: worktree_path_str.clone(),
            repo_id: repo.id.clone(),
            branch: branch.to_string(),
            status: WorktreeStatus::Creating,
        })?;
        self.state.set_progress(&worktree_path_str, Some("Queued…"));
        self.state.on_db_change();

        let engine = Arc::clone(self);
        let branch = branch.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine
                .run_create_worktree(repo, branch, worktree_path)
                .await
            {
                tracing::error!("worktree create at {} failed: {}", worktree_path_str, e);
            }
        });

        Ok(())
    }

    async fn run_create_worktree(
        self: Arc<Self>,
        repo: Repository,
        branch: String,
        worktree_path: PathBuf,
    ) -> Result<()> {
        let worktree_path_str = worktree_path.to_string_lossy().to_string();
        let bare_path = PathBuf::from(&repo.local_path);

        self.ensure_main_synced(&repo, &worktree_path_str).await;

        let config = self.db.get_worktree_config(&repo.id)?;
        let upstream_remote = config
            .as_ref()
            .map(|c| c.upstream_remote.clone())
            .unwrap_or_else(|| UPSTREAM_REMOTE.to_string());

        let create_result = self
            .git
            .create_worktree(&bare_path, &worktree_path, &branch, &upstream_remote)
            .await;

        if let Err(e) = create_result {
            self.db.delete_worktree(&worktree_path_str).ok();
            self.state.set_progress(&worktree_path_str, None);
            self.state.set_progress(&repo.id, None);
            self.state.on_db_change();
            return Err(e);
        }

        if let Some(config) = &config {
            let primary_path = bare_path.join(PRIMARY_SEGMENT);
            if let Err(e) = share::share_files(
                &primary_path,
                &worktree_path,
                &config.symlink_pattern_list(),
                &config.copy_pattern_list(),
            ) {
                tracing::warn!("file sharing into {} failed: {}", worktree_path_str, e);
            }
        }

        if let Some(pm) = install::detect_package_manager(&worktree_path) {
            let progress_key = worktree_path_str.clone();
            if let Err(e) = install::run_install(&worktree_path, pm, |line| {
                self.state.set_progress(&progress_key, Some(line));
            })
            .await
            {
                tracing::warn!("install in {} failed: {}", worktree_path_str, e);
            }
        }

        let status = self
            .git
            .get_status(&worktree_path, &upstream_remote)
            .await;

        match status {
            Ok(status) => {
                self.db.update_worktree_status(
                    &worktree_path_str,
                    WorktreeStatus::Ready,
                    status.head.as_deref(),
                    status.commit_message.as_deref(),
                )?;
                self.db.update_worktree_git_status(
                    &worktree_path_str,
                    status.dirty,
                    status.ahead,
                    status.behind,
                )?;
            }
            Err(e) => {
                self.db.delete_worktree(&worktree_path_str).ok();
                self.state.set_progress(&worktree_path_str, None);
                self.state.set_progress(&repo.id, None);
                self.state.on_db_change();
                return Err(e);
            }
        }

        self.state.set_progress(&worktree_path_str, None);
        self.state.set_progress(&repo.id, None);
        self.state.on_db_change();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Delete worktree (§4.5.5)
    // ─────────────────────────────────────────────────────────────

    pub async fn delete_worktree(self: &Arc<Self>, repo_id: &str, path: &str) -> Result<()> {
        let repo = self
            .db
            .get_repository(repo_id)?
            .ok_or_else(|| GroveError::NotFound(format!("repository {repo_id}")))?;

        let worktree = self
            .db
            .get_worktree(path)?
            .ok_or_else(|| GroveError::NotFound(format!("worktree {path}")))?;

        if worktree.status != WorktreeStatus::Ready {
            return Err(GroveError::Conflict(format!(
                "worktree {path} is not ready (status: {:?})",
                worktree.status
            )));
        }

        let engine = Arc::clone(self);
        let path = path.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.run_delete_worktree(repo, path.clone()).await {
                tracing::error!("worktree delete at {} failed: {}", path, e);
            }
        });

        Ok(())
    }

    async fn run_delete_worktree(self: Arc<Self>, repo: Repository, path: String) -> Result<()> {
        self.db
            .update_worktree_status(&path, WorktreeStatus::Deleting, None, None)?;
        self.state.on_db_change();
        tokio::time::sleep(SHOW_THEN_DO_DELAY).await;

        let bare_path = PathBuf::from(&repo.local_path);
        let result = self
            .git
            .remove_worktree(&bare_path, Path::new(&path))
            .await;

        match result {
            Ok(()) => {
                self.db.delete_worktree(&path)?;
                self.state.on_db_change();
                Ok(())
            }
            Err(e) => {
                self.db
                    .update_worktree_status(&path, WorktreeStatus::Ready, None, None)?;
                self.state.on_db_change();
                Err(e)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Delete repository (§4.5.6)
    // ─────────────────────────────────────────────────────────────

    pub async fn delete_repository(self: &Arc<Self>, id: &str) -> Result<()> {
        let repo = self
            .db
            .get_repository(id)?
            .ok_or_else(|| GroveError::NotFound(format!("repository {id}")))?;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.run_delete_repository(repo).await {
                tracing::error!("repository delete failed: {}", e);
            }
        });

        Ok(())
    }

    async fn run_delete_repository(self: Arc<Self>, repo: Repository) -> Result<()> {
        self.state.set_progress(&repo.id, Some("Deleting…"));
        self.state.on_db_change();
        tokio::time::sleep(SHOW_THEN_DO_DELAY).await;

        if let Err(e) = tokio::fs::remove_dir_all(&repo.local_path).await {
            tracing::warn!("failed to remove {}: {}", repo.local_path, e);
        }

        self.db.delete_repository(&repo.id)?;
        self.state.set_progress(&repo.id, None);
        self.state.on_db_change();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Refresh (§4.5.7)
    // ─────────────────────────────────────────────────────────────

    pub async fn refresh(self: &Arc<Self>, repo_id: &str) -> Result<()> {
        let repo = self
            .db
            .get_repository(repo_id)?
            .ok_or_else(|| GroveError::NotFound(format!("repository {repo_id}")))?;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.run_refresh(repo).await {
                tracing::error!("refresh failed: {}", e);
            }
        });

        Ok(())
    }

    async fn run_refresh(self: Arc<Self>, repo: Repository) -> Result<()> {
        self.state.set_progress(&repo.id, Some("Refreshing…"));
        self.state.on_db_change();

        let config = self.db.get_worktree_config(&repo.id)?;
        let upstream_remote = config
            .map(|c| c.upstream_remote)
            .unwrap_or_else(|| UPSTREAM_REMOTE.to_string());

        for worktree in self.db.list_worktrees(&repo.id)? {
            match self
                .git
                .get_status(Path::new(&worktree.path), &upstream_remote)
                .await
            {
                Ok(status) => {
                    self.db.update_worktree_status(
                        &worktree.path,
                        WorktreeStatus::Ready,
                        status.head.as_deref(),
                        status.commit_message.as_deref(),
                    )?;
                    self.db.update_worktree_git_status(
                        &worktree.path,
                        status.dirty,
                        status.ahead,
                        status.behind,
                    )?;
                }
                Err(e) => {
                    tracing::warn!("refresh status failed for {}: {}", worktree.path, e);
                }
            }
        }

        self.db.update_repository_synced(&repo.id)?;
        self.state.set_progress(&repo.id, None);
        self.state.on_db_change();
        Ok(())
    }
}
