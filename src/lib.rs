//! grove-core: catalog store, git executor, package-manager installer,
//! file sharer, lifecycle engine, and state broadcaster for a local fleet
//! of bare+worktree git repositories.
//!
//! This crate contains the core domain logic with no HTTP, MCP, or TUI
//! dependencies; a transport sits in front of it and is free to shape the
//! wire protocol, but calls into [`LifecycleEngine`] and [`StateManager`]
//! for everything observable.

pub mod config;
pub mod db;
pub mod error;
pub mod git;
pub mod install;
pub mod lifecycle;
pub mod share;
pub mod state;
pub mod types;
pub mod url;

pub use config::Config;
pub use db::Database;
pub use error::{GroveError, Result};
pub use git::GitExecutor;
pub use install::{detect_package_manager, run_install, PackageManager};
pub use lifecycle::LifecycleEngine;
pub use share::share_files;
pub use state::{FullState, StateManager};
pub use types::*;
pub use url::{branch_to_segment, parse_clone_url};
