//! File snapshots for oracle context.
//!
//! For each file a step declares, the engine includes a bounded snapshot of
//! its current contents so the oracle decides against the real state of the
//! tree. Missing files are reported, not errors: a step may exist precisely
//! to create them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

/// Bounded snapshot of one declared file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub contents: String,
    pub truncated: bool,
    pub missing: bool,
}

/// Snapshot the step's declared files relative to `workdir`, bounding each
/// file at `limit_bytes`. Relative paths resolve against the working
/// directory; absolute paths are read as-is.
pub fn snapshot_files(workdir: &Path, files: &[PathBuf], limit_bytes: usize) -> Vec<FileSnapshot> {
    files
        .iter()
        .map(|file| snapshot_one(workdir, file, limit_bytes))
        .collect()
}

fn snapshot_one(workdir: &Path, file: &Path, limit_bytes: usize) -> FileSnapshot {
    let resolved = if file.is_absolute() {
        file.to_path_buf()
    } else {
        workdir.join(file)
    };
    match fs::read(&resolved) {
        Ok(bytes) => {
            let truncated = bytes.len() > limit_bytes;
            let kept = &bytes[..bytes.len().min(limit_bytes)];
            FileSnapshot {
                path: file.to_path_buf(),
                contents: String::from_utf8_lossy(kept).into_owned(),
                truncated,
                missing: false,
            }
        }
        Err(err) => {
            debug!(path = %resolved.display(), err = %err, "file missing from snapshot");
            FileSnapshot {
                path: file.to_path_buf(),
                contents: String::new(),
                truncated: false,
                missing: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_existing_and_missing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("present.conf"), "worker_processes 4;\n").expect("write");

        let snaps = snapshot_files(
            temp.path(),
            &[PathBuf::from("present.conf"), PathBuf::from("absent.conf")],
            1024,
        );

        assert_eq!(snaps.len(), 2);
        assert!(!snaps[0].missing);
        assert!(snaps[0].contents.contains("worker_processes"));
        assert!(snaps[1].missing);
        assert!(snaps[1].contents.is_empty());
    }

    #[test]
    fn large_files_are_truncated_at_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("big.log"), "x".repeat(5000)).expect("write");

        let snaps = snapshot_files(temp.path(), &[PathBuf::from("big.log")], 100);
        assert!(snaps[0].truncated);
        assert_eq!(snaps[0].contents.len(), 100);
    }

    #[test]
    fn no_files_means_no_snapshots() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(snapshot_files(temp.path(), &[], 1024).is_empty());
    }
}
