//! Git adapter for the `rollback_commit` capability.
//!
//! A small, explicit wrapper around `git` subprocess calls; the rollback tool
//! reverts the most recent commit rather than resetting, so the history of
//! what the run did stays intact.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::run_with_timeout;

const GIT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Current HEAD short SHA.
    pub fn head_short_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--short", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Revert the most recent commit without opening an editor. Returns the
    /// SHA that was reverted.
    #[instrument(skip_all)]
    pub fn revert_head(&self) -> Result<String> {
        let reverted = self.head_short_sha()?;
        self.run_capture(&["revert", "--no-edit", "HEAD"])?;
        debug!(reverted = %reverted, "reverted HEAD");
        Ok(reverted)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let out = run_with_timeout(cmd, None, self.timeout, GIT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run git {}", args.join(" ")))?;
        if out.timed_out {
            return Err(anyhow!("git {} timed out", args.join(" ")));
        }
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                out.stderr_text().trim()
            ));
        }
        Ok(out.stdout_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn init_repo(root: &Path) {
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "test"],
        ] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(root)
                .status()
                .expect("git");
            assert!(status.success(), "git {args:?}");
        }
    }

    fn commit_file(root: &Path, name: &str, contents: &str, message: &str) {
        fs::write(root.join(name), contents).expect("write");
        for args in [vec!["add", name], vec!["commit", "-m", message]] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(root)
                .status()
                .expect("git");
            assert!(status.success(), "git {args:?}");
        }
    }

    /// Reverting HEAD restores the previous file contents while keeping the
    /// bad commit in history.
    #[test]
    fn revert_head_undoes_last_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        init_repo(root);
        commit_file(root, "conf.txt", "good\n", "chore: good config");
        commit_file(root, "conf.txt", "bad\n", "chore: bad config");

        let git = Git::new(root, Duration::from_secs(30));
        let reverted = git.revert_head().expect("revert");
        assert!(!reverted.is_empty());
        assert_eq!(fs::read_to_string(root.join("conf.txt")).expect("read"), "good\n");
    }

    #[test]
    fn git_errors_surface_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path(), Duration::from_secs(30));
        let err = git.head_short_sha().unwrap_err();
        assert!(err.to_string().contains("git rev-parse"));
    }
}
