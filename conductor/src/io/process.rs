//! Helpers for running non-interactive child processes with timeouts and
//! bounded output. Used for collaborator round trips (oracle subprocess, git);
//! interactive commands go through [`crate::io::interactive`] instead.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run a command with a timeout, capturing stdout/stderr without risking pipe
/// deadlocks. Stdin is fed and output read concurrently while the child runs;
/// `output_limit_bytes` bounds what is kept in memory (the pipes are still
/// drained past the limit).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    // Written from its own thread: a child that fills its stdout pipe before
    // draining stdin would otherwise block us here with no timeout armed yet.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let payload = input.to_vec();
            Some(thread::spawn(move || {
                // A child may exit without reading all of its stdin; the
                // resulting broken pipe is not an error.
                let _ = child_stdin.write_all(&payload);
                // Dropping the handle closes the pipe so the child sees EOF.
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join_reader(stdout_handle).context("join stdout")?;
    let stderr = join_reader(stderr_handle).context("join stderr")?;
    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            buf.extend_from_slice(&chunk[..n.min(remaining)]);
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let out = run_with_timeout(cmd, None, Duration::from_secs(5), 10_000).expect("run");
        assert!(out.status.success());
        assert!(out.stdout_text().contains("out"));
        assert!(out.stderr_text().contains("err"));
        assert!(!out.timed_out);
    }

    #[test]
    fn feeds_stdin_to_child() {
        let mut cmd = Command::new("cat");
        cmd.arg("-");
        let out = run_with_timeout(cmd, Some(b"payload"), Duration::from_secs(5), 10_000)
            .expect("run");
        assert_eq!(out.stdout_text(), "payload");
    }

    /// A child that floods stdout before touching stdin must not wedge the
    /// caller on the stdin write.
    #[test]
    fn large_stdin_and_early_output_do_not_deadlock() {
        let payload = vec![b'x'; 1_000_000];
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "head -c 1000000 /dev/zero; cat > /dev/null"]);
        let out =
            run_with_timeout(cmd, Some(&payload), Duration::from_secs(10), 2_000).expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout.len(), 2_000);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let out = run_with_timeout(cmd, None, Duration::from_millis(200), 10_000).expect("run");
        assert!(out.timed_out);
    }

    #[test]
    fn output_is_bounded() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "yes | head -c 100000"]);
        let out = run_with_timeout(cmd, None, Duration::from_secs(5), 1_000).expect("run");
        assert_eq!(out.stdout.len(), 1_000);
    }
}
