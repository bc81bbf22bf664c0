//! State broadcaster: maintains in-memory per-path progress messages and
//! pushes a debounced full-state snapshot to every subscriber.
//!
//! Pushes are trailing-edge debounced — a burst of mutations within
//! `debounce_interval` of each other collapses to a single snapshot, sent
//! `debounce_interval` after the last one in the burst — so a worktree
//! delete that fires ten database writes in a row produces one push, not
//! ten. Each subscriber gets an independent broadcast receiver; a slow
//! subscriber lags and drops its own backlog without holding up anyone
//! else's.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};

use crate::types::RepoWithWorktrees;
use crate::Config;
use crate::Database;

/// A full snapshot of catalog state plus any in-flight progress messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    pub repositories: Vec<RepoWithWorktrees>,
    pub progress: HashMap<String, String>,
}

/// Debounced broadcaster of [`FullState`] snapshots.
pub struct StateManager {
    tx: broadcast::Sender<FullState>,
    progress: RwLock<HashMap<String, String>>,
    db: Arc<Database>,
    debounce_interval: std::time::Duration,
    notify: Notify,
    generation: AtomicU64,
}

impl StateManager {
    pub fn new(db: Arc<Database>, config: &Config) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        let manager = Arc::new(Self {
            tx,
            progress: RwLock::new(HashMap::new()),
            db,
            debounce_interval: config.debounce_interval,
            notify: Notify::new(),
            generation: AtomicU64::new(0),
        });
        manager.clone().spawn_debounce_task();
        manager
    }

    /// Subscribe to state changes. The first snapshot is not sent
    /// automatically; callers that want the current state immediately
    /// should call [`Self::get_full_state`] right after subscribing, or use
    /// [`Self::snapshots`] which does this for them.
    pub fn subscribe(&self) -> broadcast::Receiver<FullState> {
        self.tx.subscribe()
    }

    /// A stream of snapshots whose first item is the current state —
    /// every new subscriber is resynchronized immediately instead of
    /// waiting for the next mutation. A subscriber that falls behind drops
    /// its own backlog (via `BroadcastStream`'s `Lagged` handling) without
    /// affecting any other subscriber.
    pub fn snapshots(&self) -> impl futures::Stream<Item = FullState> {
        use futures::stream::{self, StreamExt};
        use tokio_stream::wrappers::BroadcastStream;

        let initial = self.get_full_state();
        let rest = BroadcastStream::new(self.tx.subscribe()).filter_map(|res| async move { res.ok() });
        stream::once(async move { initial }).chain(rest)
    }

    /// Set (or, with `None`, clear) the progress message for a path —
    /// a repository id or worktree path.
    pub fn set_progress(&self, path: &str, message: Option<&str>) {
        {
            let mut progress = self.progress.write().unwrap();
            match message {
                Some(msg) => {
                    progress.insert(path.to_string(), msg.to_string());
                }
                None => {
                    progress.remove(path);
                }
            }
        }
        self.request_push();
    }

    /// Notify that the catalog changed; schedules a debounced push.
    pub fn on_db_change(&self) {
        self.request_push();
    }

    fn request_push(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn spawn_debounce_task(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                self.notify.notified().await;
                let seen = self.generation.load(Ordering::SeqCst);
                tokio::time::sleep(self.debounce_interval).await;

                if self.generation.load(Ordering::SeqCst) == seen {
                    self.push_state();
                } else {
                    // Another mutation landed during the sleep; the next
                    // iteration of the loop will wait out its own interval.
                    self.notify.notify_one();
                }
            }
        });
    }

    fn push_state(&self) {
        let state = self.get_full_state();
        let _ = self.tx.send(state);
    }

    /// Compose the current full snapshot directly from the catalog —
    /// useful to call immediately after subscribing, since the broadcast
    /// channel only delivers snapshots produced after subscription.
    pub fn get_full_state(&self) -> FullState {
        let repositories = self.get_repos_with_worktrees();
        let progress = self.progress.read().unwrap().clone();
        FullState {
            repositories,
            progress,
        }
    }

    fn get_repos_with_worktrees(&self) -> Vec<RepoWithWorktrees> {
        let repos = match self.db.list_repositories() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("failed to list repositories: {}", e);
                return vec![];
            }
        };

        repos
            .into_iter()
            .map(|repo| {
                let worktrees = self.db.list_worktrees(&repo.id).unwrap_or_else(|e| {
                    tracing::error!("failed to list worktrees for {}: {}", repo.name, e);
                    vec![]
                });
                RepoWithWorktrees { repo, worktrees }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_of_mutations_collapses_to_one_push() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = Config::at(
            tempfile::tempdir().unwrap().keep(),
            tempfile::tempdir().unwrap().keep(),
        );
        let manager = StateManager::new(db, &config);
        let mut rx = manager.subscribe();

        for _ in 0..5 {
            manager.on_db_change();
        }

        let state =
            tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .expect("should receive a snapshot")
                .unwrap();
        assert!(state.repositories.is_empty());

        // No second push should follow from the same burst.
        let second =
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(second.is_err(), "burst produced more than one push");
    }

    /// §8 property 7: serialize-then-deserialize of any snapshot is
    /// structurally equal to the original.
    #[test]
    fn snapshot_round_trips_through_json() {
        use crate::types::{NewRepository, NewWorktree, WorktreeStatus};

        let db = Database::open_in_memory().unwrap();
        let repo_id = db
            .insert_repository(&NewRepository {
                provider: "github".to_string(),
                username: "acme".to_string(),
                name: "widgets".to_string(),
                clone_url: "git@github.com:acme/widgets.git".to_string(),
                local_path: "/code/acme/widgets".to_string(),
                repo_type: "bare".to_string(),
                default_branch: "main".to_string(),
                last_synced: 0,
            })
            .unwrap();
        db.insert_worktree(&NewWorktree {
            path: "/code/acme/widgets/.main".to_string(),
            repo_id: repo_id.clone(),
            branch: "main".to_string(),
            status: WorktreeStatus::Ready,
        })
        .unwrap();

        let config = Config::at(
            tempfile::tempdir().unwrap().keep(),
            tempfile::tempdir().unwrap().keep(),
        );
        let manager = StateManager::new(Arc::new(db), &config);
        manager.set_progress(&repo_id, Some("Refreshing…"));

        let original = manager.get_full_state();
        assert_eq!(original.repositories.len(), 1);

        let json = serde_json::to_string(&original).unwrap();
        let round_tripped: FullState = serde_json::from_str(&json).unwrap();

        assert_eq!(original, round_tripped);
    }
}
