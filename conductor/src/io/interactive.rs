//! Terminal-transparent interactive command execution.
//!
//! Runs one shell command under a pseudoterminal, relaying bytes between the
//! operator's terminal and the child, with an inactivity timeout that is
//! suspended whenever the child's terminal has echo disabled (a password
//! prompt may legitimately wait indefinitely).

use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::io::pty::{PtySession, RawModeGuard, poll_session, read_fd};

/// Fixed marker recorded in the transcript in place of operator keystrokes
/// typed while echo is disabled. Fixed length by design: the transcript must
/// not reveal secret input length.
pub const INPUT_MASK: &str = "********";

/// Parameters for one interactive command execution.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Shell command line, run via `/bin/sh -c`.
    pub command: String,
    /// Working directory override; falls back to the runner's default.
    pub workdir: Option<PathBuf>,
    /// Inactivity timeout: wall-clock time since the last byte transferred in
    /// either direction.
    pub timeout: Duration,
}

/// Outcome of one interactive command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTranscript {
    /// Child exit code; `None` when the command was killed for inactivity.
    pub exit_code: Option<i32>,
    /// Everything relayed from the child, plus (masked) operator input.
    pub transcript: String,
    pub timed_out: bool,
    /// Bytes dropped once the transcript hit the configured limit.
    pub truncated: usize,
}

impl CommandTranscript {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over command execution so the engine is testable without a
/// pty. Production uses [`InteractiveRunner`]; tests use scripted runners.
pub trait CommandRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandTranscript>;
}

/// The real pty-backed runner.
pub struct InteractiveRunner {
    default_workdir: PathBuf,
    poll_interval: Duration,
    output_limit_bytes: usize,
}

static PRIVILEGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(sudo)(\s|$)").expect("privilege regex should be valid"));

impl InteractiveRunner {
    pub fn new(
        default_workdir: PathBuf,
        poll_interval: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            default_workdir,
            poll_interval,
            output_limit_bytes,
        }
    }
}

impl CommandRunner for InteractiveRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &CommandRequest) -> Result<CommandTranscript> {
        let command = request.command.trim();
        if command.is_empty() {
            return Err(anyhow!("refusing to execute an empty command"));
        }
        let command = rewrite_privileged(command);

        let workdir = request
            .workdir
            .clone()
            .unwrap_or_else(|| self.default_workdir.clone());
        if !workdir.is_dir() {
            return Err(anyhow!(
                "working directory {} does not exist",
                workdir.display()
            ));
        }

        debug!(command = %command, workdir = %workdir.display(), "starting interactive command");

        // Raw mode so operator keystrokes are delivered byte-for-byte; the
        // guard restores the saved mode on every exit path.
        let _raw = RawModeGuard::acquire();
        let mut pty = PtySession::spawn(&command, &workdir).context("spawn pty child")?;

        let mut transcript: Vec<u8> = Vec::new();
        let mut truncated = 0usize;
        let mut operator: Option<i32> = Some(libc::STDIN_FILENO);
        let mut last_activity = Instant::now();

        loop {
            if let Some(code) = pty.try_wait().context("wait for pty child")? {
                // Drain whatever the child left buffered before it exited.
                while let Some(chunk) = pty.read_leader().context("drain pty output")? {
                    relay_to_operator(&chunk);
                    append_limited(
                        &mut transcript,
                        &chunk,
                        self.output_limit_bytes,
                        &mut truncated,
                    );
                }
                debug!(exit_code = code, "interactive command finished");
                return Ok(CommandTranscript {
                    exit_code: Some(code),
                    transcript: String::from_utf8_lossy(&transcript).into_owned(),
                    timed_out: false,
                    truncated,
                });
            }

            // Echo disabled means the child is (potentially) waiting on
            // masked input; the inactivity timeout is suspended entirely.
            let echo = pty.echo_enabled();
            if echo && last_activity.elapsed() > request.timeout {
                warn!(
                    timeout_secs = request.timeout.as_secs(),
                    "no activity within timeout, killing process group"
                );
                pty.kill_group();
                let _ = pty.wait();
                return Ok(CommandTranscript {
                    exit_code: None,
                    transcript: String::from_utf8_lossy(&transcript).into_owned(),
                    timed_out: true,
                    truncated,
                });
            }

            let ready = poll_session(pty.leader_fd(), operator, self.poll_interval)
                .context("poll pty session")?;

            if ready.leader_readable
                && let Some(chunk) = pty.read_leader().context("read pty output")?
            {
                relay_to_operator(&chunk);
                append_limited(
                    &mut transcript,
                    &chunk,
                    self.output_limit_bytes,
                    &mut truncated,
                );
                last_activity = Instant::now();
            }

            if ready.operator_gone {
                operator = None;
            } else if ready.operator_readable
                && let Some(fd) = operator
            {
                let mut buf = [0u8; 1024];
                match read_fd(fd, &mut buf) {
                    // EOF: stop watching without resetting the activity clock.
                    Ok(0) => operator = None,
                    Ok(n) => {
                        pty.write_leader(&buf[..n]).context("relay operator input")?;
                        record_operator_bytes(
                            &mut transcript,
                            &buf[..n],
                            echo,
                            self.output_limit_bytes,
                            &mut truncated,
                        );
                        last_activity = Instant::now();
                    }
                    Err(err)
                        if err.kind() == std::io::ErrorKind::WouldBlock
                            || err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        warn!(err = %err, "operator input stream failed, ignoring it");
                        operator = None;
                    }
                }
            }
        }
    }
}

/// Rewrite privilege-escalation commands to read the password from the
/// terminal the relay loop controls (`sudo -S` prompts on the pty) instead of
/// some other channel.
fn rewrite_privileged(command: &str) -> String {
    if !PRIVILEGE_RE.is_match(command) {
        return command.to_string();
    }
    let already_stdin = command
        .split_whitespace()
        .any(|token| token == "-S" || token == "--stdin");
    if already_stdin {
        return command.to_string();
    }
    PRIVILEGE_RE.replace(command, "$1 -S$2").into_owned()
}

/// Relay child output to the operator's display. Best-effort: a closed
/// operator stream must not abort the command.
fn relay_to_operator(chunk: &[u8]) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(chunk);
    let _ = stdout.flush();
}

/// Record operator input in the transcript: verbatim while echo is on, a
/// fixed mask while echo is off. The real bytes always reach the child.
fn record_operator_bytes(
    transcript: &mut Vec<u8>,
    bytes: &[u8],
    echo_enabled: bool,
    limit: usize,
    truncated: &mut usize,
) {
    if echo_enabled {
        append_limited(transcript, bytes, limit, truncated);
    } else {
        append_limited(transcript, INPUT_MASK.as_bytes(), limit, truncated);
    }
}

fn append_limited(buf: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut usize) {
    let remaining = limit.saturating_sub(buf.len());
    let keep = chunk.len().min(remaining);
    buf.extend_from_slice(&chunk[..keep]);
    *truncated += chunk.len() - keep;
}
