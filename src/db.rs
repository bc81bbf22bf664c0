//! SQLite-backed catalog store.
//!
//! Single connection guarded by a mutex: one writer at a time, but reads
//! never block on other reads since each call only holds the lock for the
//! duration of a single statement. WAL mode and foreign keys are turned on
//! at open so a crash mid-write leaves the database recoverable and a
//! worktree row can never outlive its repository.

use crate::error::{GroveError, Result};
use crate::types::*;
use crate::Config;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Durable catalog of repositories, worktrees, and their config.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if absent) the database at the configured path.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;

        let conn = Connection::open(&config.db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Repositories
    // ─────────────────────────────────────────────────────────────

    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider, username, name, clone_url, local_path,
                    type, default_branch, last_synced, created_at, deleted_at
             FROM repositories
             WHERE deleted_at IS NULL
             ORDER BY created_at DESC",
        )?;

        let repos = stmt
            .query_map([], row_to_repository)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    pub fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider, username, name, clone_url, local_path,
                    type, default_branch, last_synced, created_at, deleted_at
             FROM repositories
             WHERE id = ?1 AND deleted_at IS NULL",
        )?;
        Ok(stmt.query_row([id], row_to_repository).optional()?)
    }

    pub fn get_repository_by_name(
        &self,
        provider: &str,
        username: &str,
        name: &str,
    ) -> Result<Option<Repository>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider, username, name, clone_url, local_path,
                    type, default_branch, last_synced, created_at, deleted_at
             FROM repositories
             WHERE provider = ?1 AND username = ?2 AND name = ?3 AND deleted_at IS NULL",
        )?;
        Ok(stmt
            .query_row(params![provider, username, name], row_to_repository)
            .optional()?)
    }

    pub fn get_repository_by_path(&self, local_path: &str) -> Result<Option<Repository>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider, username, name, clone_url, local_path,
                    type, default_branch, last_synced, created_at, deleted_at
             FROM repositories
             WHERE local_path = ?1 AND deleted_at IS NULL",
        )?;
        Ok(stmt
            .query_row([local_path], row_to_repository)
            .optional()?)
    }

    /// Insert a new repository, returning its id.
    ///
    /// Fails with `Conflict` if `local_path` or `(provider, username, name)`
    /// collides with a live row.
    pub fn insert_repository(&self, repo: &NewRepository) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO repositories
             (id, provider, username, name, clone_url, local_path, type, default_branch, last_synced, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                repo.provider,
                repo.username,
                repo.name,
                repo.clone_url,
                repo.local_path,
                repo.repo_type,
                repo.default_branch,
                repo.last_synced,
                now,
            ],
        )
        .map_err(conflict_on_unique_violation)?;

        Ok(id)
    }

    /// Hard delete a repository and cascade to its worktrees and config.
    pub fn delete_repository(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM worktrees WHERE repo_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM worktree_config WHERE repo_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_repository_synced(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "UPDATE repositories SET last_synced = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn update_repository_default_branch(&self, id: &str, default_branch: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE repositories SET default_branch = ?1 WHERE id = ?2",
            params![default_branch, id],
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Worktrees
    // ─────────────────────────────────────────────────────────────

    pub fn list_worktrees(&self, repo_id: &str) -> Result<Vec<Worktree>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, repo_id, branch, head, status, commit_message,
                    dirty, ahead, behind, last_status_check, created_at, deleted_at
             FROM worktrees
             WHERE repo_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at ASC",
        )?;
        let worktrees = stmt
            .query_map([repo_id], row_to_worktree)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(worktrees)
    }

    pub fn get_worktree(&self, path: &str) -> Result<Option<Worktree>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, repo_id, branch, head, status, commit_message,
                    dirty, ahead, behind, last_status_check, created_at, deleted_at
             FROM worktrees
             WHERE path = ?1 AND deleted_at IS NULL",
        )?;
        Ok(stmt.query_row([path], row_to_worktree).optional()?)
    }

    /// Insert a new worktree row with status `Creating`.
    ///
    /// Fails with `Conflict` if a row already exists at `path`.
    pub fn insert_worktree(&self, worktree: &NewWorktree) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO worktrees (path, repo_id, branch, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                worktree.path,
                worktree.repo_id,
                worktree.branch,
                worktree.status.as_str(),
                now,
            ],
        )
        .map_err(conflict_on_unique_violation)?;
        Ok(())
    }

    pub fn update_worktree_status(
        &self,
        path: &str,
        status: WorktreeStatus,
        head: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE worktrees SET status = ?1, head = ?2, commit_message = ?3 WHERE path = ?4",
            params![status.as_str(), head, commit_message, path],
        )?;
        Ok(())
    }

    pub fn update_worktree_git_status(
        &self,
        path: &str,
        dirty: bool,
        ahead: i32,
        behind: i32,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "UPDATE worktrees SET dirty = ?1, ahead = ?2, behind = ?3, last_status_check = ?4 WHERE path = ?5",
            params![dirty, ahead, behind, now, path],
        )?;
        Ok(())
    }

    pub fn delete_worktree(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM worktrees WHERE path = ?1", params![path])?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Worktree Config
    // ─────────────────────────────────────────────────────────────

    pub fn get_worktree_config(&self, repo_id: &str) -> Result<Option<WorktreeConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT repo_id, symlink_patterns, copy_patterns, upstream_remote
             FROM worktree_config WHERE repo_id = ?1",
        )?;
        let config = stmt
            .query_row([repo_id], |row| {
                Ok(WorktreeConfig {
                    repo_id: row.get(0)?,
                    symlink_patterns: row.get(1)?,
                    copy_patterns: row.get(2)?,
                    upstream_remote: row.get(3)?,
                })
            })
            .optional()?;
        Ok(config)
    }

    pub fn upsert_worktree_config(&self, config: &WorktreeConfig) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO worktree_config (repo_id, symlink_patterns, copy_patterns, upstream_remote)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_id) DO UPDATE SET
                symlink_patterns = excluded.symlink_patterns,
                copy_patterns = excluded.copy_patterns,
                upstream_remote = excluded.upstream_remote",
            params![
                config.repo_id,
                config.symlink_patterns,
                config.copy_patterns,
                config.upstream_remote,
            ],
        )?;
        Ok(())
    }
}

fn row_to_repository(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        provider: row.get(1)?,
        username: row.get(2)?,
        name: row.get(3)?,
        clone_url: row.get(4)?,
        local_path: row.get(5)?,
        repo_type: row.get(6)?,
        default_branch: row.get(7)?,
        last_synced: row.get(8)?,
        created_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

fn row_to_worktree(row: &rusqlite::Row) -> rusqlite::Result<Worktree> {
    let status_str: String = row.get(4)?;
    Ok(Worktree {
        path: row.get(0)?,
        repo_id: row.get(1)?,
        branch: row.get(2)?,
        head: row.get(3)?,
        status: status_str.parse().unwrap_or(WorktreeStatus::Error),
        commit_message: row.get(5)?,
        dirty: row.get(6)?,
        ahead: row.get(7)?,
        behind: row.get(8)?,
        last_status_check: row.get(9)?,
        created_at: row.get(10)?,
        deleted_at: row.get(11)?,
    })
}

/// Turn a UNIQUE-constraint violation into `GroveError::Conflict`; anything
/// else stays a `Storage` error.
fn conflict_on_unique_violation(e: rusqlite::Error) -> GroveError {
    if let rusqlite::Error::SqliteFailure(ref ffi_err, ref msg) = e {
        if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation {
            return GroveError::Conflict(
                msg.clone()
                    .unwrap_or_else(|| "unique constraint violated".to_string()),
            );
        }
    }
    GroveError::from(e)
}
