//! Exercises the lifecycle engine against a real local bare git repository
//! (created with the `git` binary in a tempdir, not mocked): worktree
//! create, delete, and the synchronous validation paths of `clone`.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use grove_core::types::{NewRepository, WorktreeStatus};
use grove_core::{Config, Database, GroveError, LifecycleEngine, StateManager};
use tempfile::tempdir;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git binary must be on PATH for this test");
    assert!(status.success(), "git {:?} failed in {:?}", args, dir);
}

/// Build a bare repo + primary worktree at `local_path`, exactly the shape
/// `LifecycleEngine::clone` would have produced, without going through the
/// network-dependent clone path itself.
fn seed_repo(local_path: &Path) {
    std::fs::create_dir_all(local_path).unwrap();
    let bare_path = local_path.join(".bare");
    git(local_path, &["init", "--bare", "--initial-branch=main", ".bare"]);
    std::fs::write(local_path.join(".git"), "gitdir: ./.bare\n").unwrap();

    let primary_path = local_path.join(".main");
    git(&bare_path, &["worktree", "add", "-b", "main", &primary_path.to_string_lossy()]);
    git(&primary_path, &["config", "user.email", "test@example.com"]);
    git(&primary_path, &["config", "user.name", "test"]);
    std::fs::write(primary_path.join("README.md"), "hello\n").unwrap();
    git(&primary_path, &["add", "."]);
    git(&primary_path, &["commit", "-m", "initial commit"]);
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) {
    let start = std::time::Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn test_engine(root: &Path) -> (Arc<Database>, Arc<LifecycleEngine>, Config) {
    let config = Config::at(root.join("data-root"), root.join("code"));
    let db = Arc::new(Database::open(&config).unwrap());
    let state = StateManager::new(db.clone(), &config);
    let engine = LifecycleEngine::new(db.clone(), state, config.clone());
    (db, engine, config)
}

#[tokio::test]
async fn clone_rejects_unparseable_url_synchronously() {
    let root = tempdir().unwrap();
    let (_db, engine, _config) = test_engine(root.path());

    let err = engine.clone("not-a-url").await.unwrap_err();
    assert!(matches!(err, GroveError::InvalidUrl(_)));
}

#[tokio::test]
async fn clone_rejects_when_local_path_already_catalogued() {
    let root = tempdir().unwrap();
    let (db, engine, config) = test_engine(root.path());

    let local_path = config.code_dir.join("acme").join("widgets");
    db.insert_repository(&NewRepository {
        provider: "github".to_string(),
        username: "acme".to_string(),
        name: "widgets".to_string(),
        clone_url: "git@github.com:acme/widgets.git".to_string(),
        local_path: local_path.to_string_lossy().to_string(),
        repo_type: "bare".to_string(),
        default_branch: "main".to_string(),
        last_synced: 0,
    })
    .unwrap();

    let err = engine
        .clone("git@github.com:acme/widgets.git")
        .await
        .unwrap_err();
    assert!(matches!(err, GroveError::Conflict(_)));
}

#[tokio::test]
async fn create_worktree_then_delete_worktree_roundtrip() {
    let root = tempdir().unwrap();
    let (db, engine, config) = test_engine(root.path());

    let local_path = config.code_dir.join("acme").join("widgets");
    seed_repo(&local_path);

    let repo_id = db
        .insert_repository(&NewRepository {
            provider: "github".to_string(),
            username: "acme".to_string(),
            name: "widgets".to_string(),
            clone_url: "git@github.com:acme/widgets.git".to_string(),
            local_path: local_path.to_string_lossy().to_string(),
            repo_type: "bare".to_string(),
            default_branch: "main".to_string(),
            last_synced: 0,
        })
        .unwrap();

    engine
        .create_worktree(&repo_id, "feature/login")
        .await
        .expect("create_worktree should be accepted");

    let expected_path = local_path.join("feature--login");
    let expected_path_str = expected_path.to_string_lossy().to_string();

    wait_until(
        || {
            db.get_worktree(&expected_path_str)
                .unwrap()
                .map(|w| w.status == WorktreeStatus::Ready)
                .unwrap_or(false)
        },
        Duration::from_secs(10),
    )
    .await;

    assert!(expected_path.join("README.md").exists());
    let worktree = db.get_worktree(&expected_path_str).unwrap().unwrap();
    assert_eq!(worktree.branch, "feature/login");

    engine
        .delete_worktree(&repo_id, &expected_path_str)
        .await
        .expect("delete_worktree should be accepted");

    wait_until(
        || db.get_worktree(&expected_path_str).unwrap().is_none(),
        Duration::from_secs(10),
    )
    .await;

    assert!(!expected_path.exists());
}

#[tokio::test]
async fn create_worktree_rejects_empty_and_dot_only_branch_names() {
    let root = tempdir().unwrap();
    let (db, engine, config) = test_engine(root.path());

    let local_path = config.code_dir.join("acme").join("widgets");
    seed_repo(&local_path);

    let repo_id = db
        .insert_repository(&NewRepository {
            provider: "github".to_string(),
            username: "acme".to_string(),
            name: "widgets".to_string(),
            clone_url: "git@github.com:acme/widgets.git".to_string(),
            local_path: local_path.to_string_lossy().to_string(),
            repo_type: "bare".to_string(),
            default_branch: "main".to_string(),
            last_synced: 0,
        })
        .unwrap();

    assert!(matches!(
        engine.create_worktree(&repo_id, "   ").await.unwrap_err(),
        GroveError::InvalidBranch(_)
    ));
    assert!(matches!(
        engine.create_worktree(&repo_id, "..").await.unwrap_err(),
        GroveError::InvalidBranch(_)
    ));
}

#[tokio::test]
async fn delete_worktree_conflicts_while_not_ready() {
    let root = tempdir().unwrap();
    let (db, engine, config) = test_engine(root.path());

    let local_path = config.code_dir.join("acme").join("widgets");
    seed_repo(&local_path);

    let repo_id = db
        .insert_repository(&NewRepository {
            provider: "github".to_string(),
            username: "acme".to_string(),
            name: "widgets".to_string(),
            clone_url: "git@github.com:acme/widgets.git".to_string(),
            local_path: local_path.to_string_lossy().to_string(),
            repo_type: "bare".to_string(),
            default_branch: "main".to_string(),
            last_synced: 0,
        })
        .unwrap();

    engine
        .create_worktree(&repo_id, "feature/wip")
        .await
        .unwrap();

    let path = local_path.join("feature--wip").to_string_lossy().to_string();
    // The row exists but is still `Creating` immediately after the call
    // returns its Ack — deleting it now must be rejected, not queued.
    let err = engine.delete_worktree(&repo_id, &path).await.unwrap_err();
    assert!(matches!(err, GroveError::Conflict(_)));
}
