//! Configuration for grove

use std::path::PathBuf;
use std::time::Duration;

/// Minimum interval between consecutive shared main-syncs per repository.
pub const DEFAULT_SYNC_COOLDOWN: Duration = Duration::from_secs(10);

/// Maximum latency between a catalog/progress mutation and the snapshot push.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(50);

/// Grove configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory where repositories are cloned
    pub code_dir: PathBuf,
    /// Directory for grove data (database, etc.)
    pub data_dir: PathBuf,
    /// Database file path
    pub db_path: PathBuf,
    /// Minimum interval between consecutive shared main-syncs per repository
    pub sync_cooldown: Duration,
    /// Maximum latency between a mutation and the resulting snapshot push
    pub debounce_interval: Duration,
}

impl Config {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        let home = dirs::home_dir().expect("could not determine home directory");

        let grove_root = std::env::var("GROVE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".grove"));

        let code_dir = std::env::var("GROVE_CODE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("code"));

        let data_dir = grove_root.join("data");
        let db_path = data_dir.join("repos.db");

        Self {
            code_dir,
            data_dir,
            db_path,
            sync_cooldown: DEFAULT_SYNC_COOLDOWN,
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
        }
    }

    /// Build a config rooted at an arbitrary directory, for tests and
    /// embedders that don't want `~/.grove`/`~/code`.
    pub fn at(root: impl Into<PathBuf>, code_dir: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            code_dir: code_dir.into(),
            data_dir: root.join("data"),
            db_path: root.join("data").join("repos.db"),
            sync_cooldown: DEFAULT_SYNC_COOLDOWN,
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
        }
    }

    /// Ensure all directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.code_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
