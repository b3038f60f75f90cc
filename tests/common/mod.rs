//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use filetime::{set_file_mtime, FileTime};
use roux_core::{config::RouxConfig, properties::Node, SyncEngine};
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write `content` to `rel` under `root`, creating parent directories.
#[allow(dead_code)]
pub fn write_doc(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Push the modification time of `path` into the future so the next sync sees it as changed
/// regardless of filesystem timestamp granularity.
#[allow(dead_code)]
pub fn touch_forward(path: &Path, secs: u64) {
    let later = SystemTime::now() + Duration::from_secs(secs);
    set_file_mtime(path, FileTime::from_system_time(later)).unwrap();
}

#[allow(dead_code)]
pub async fn open_engine(temp_dir: &TempDir) -> SyncEngine {
    init_logging();
    SyncEngine::open(RouxConfig::new(temp_dir.path()))
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn node_at(engine: &SyncEngine, rel: &str) -> Node {
    engine
        .cache()
        .get_by_path(engine.root().join(rel))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{rel} should be cached"))
}
