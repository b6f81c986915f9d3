//! Shared helpers for worker-pool sizing and project directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Number of workers for CPU-bound stages: 75% of the available parallelism, at least 1.
pub fn worker_count() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    scaled_worker_count(available)
}

fn scaled_worker_count(available: usize) -> usize {
    (available * 3 / 4).max(1)
}

/// Builds a rayon pool for one stage.
///
/// The pool is owned by the caller and dropped when the stage is done; nothing about it is
/// process-global.
///
/// # Errors
///
/// Returns an error if the OS refuses to spawn the worker threads.
pub fn build_pool(workers: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("craml-worker-{i}"))
        .build()
        .context("Failed to build worker pool")
}

/// Gets the cross-platform default project directory.
///
/// Returns `{data_dir}/craml/default` where `data_dir` is:
/// - Linux: `~/.local/share`
/// - macOS: `~/Library/Application Support`
/// - Windows: `C:\Users\<user>\AppData\Roaming`
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined.
pub fn default_project_dir() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Failed to determine data directory"))?;

    Ok(data_dir.join("craml").join("default"))
}

/// Ensures the parent directory of a file exists.
pub fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

/// Returns the file stem of a path as an owned string (empty if it has none).
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_three_quarters_with_floor_of_one() {
        assert_eq!(scaled_worker_count(1), 1);
        assert_eq!(scaled_worker_count(2), 1);
        assert_eq!(scaled_worker_count(8), 6);
        assert_eq!(scaled_worker_count(16), 12);
        assert!(worker_count() >= 1);
    }

    #[test]
    fn default_project_dir_ends_in_craml_default() {
        let path = default_project_dir().unwrap();
        assert!(path.ends_with("craml/default"));
    }

    #[test]
    fn build_pool_uses_requested_threads() {
        let pool = build_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }

    #[test]
    fn ensure_parent_directory_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a/b/c.csv");
        ensure_parent_directory(&file).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
