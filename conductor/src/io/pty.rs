//! Low-level pseudoterminal plumbing for the interactive executor.
//!
//! This is the crate's only unsafe surface: pty allocation, fork/exec of the
//! child shell as a session leader, follower-side termios queries, raw-mode
//! toggling of the invoking terminal, and fd-level poll/read/write. The relay
//! policy (timeouts, masking) lives in [`crate::io::interactive`].
#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(io::Error),
    #[error("failed to fork: {0}")]
    Fork(io::Error),
    #[error("command contains a NUL byte")]
    NulInCommand,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A shell command running under a pseudoterminal pair.
///
/// The leader end belongs exclusively to this session and is closed on drop;
/// the follower end stays open in the parent so its termios flags (echo) can
/// be queried while the child runs.
pub struct PtySession {
    leader: OwnedFd,
    follower: OwnedFd,
    pid: libc::pid_t,
    exit_code: Option<i32>,
}

impl PtySession {
    /// Spawn `/bin/sh -c command` attached to a fresh pty, as the leader of a
    /// new session (so the whole process group can be signaled together).
    pub fn spawn(command: &str, workdir: &Path) -> Result<Self, PtyError> {
        let shell = CString::new("/bin/sh").map_err(|_| PtyError::NulInCommand)?;
        let dash_c = CString::new("-c").map_err(|_| PtyError::NulInCommand)?;
        let command = CString::new(command).map_err(|_| PtyError::NulInCommand)?;
        let workdir =
            CString::new(workdir.as_os_str().as_bytes()).map_err(|_| PtyError::NulInCommand)?;

        let mut leader_fd: RawFd = -1;
        let mut follower_fd: RawFd = -1;

        unsafe {
            if libc::openpty(
                &mut leader_fd,
                &mut follower_fd,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            ) != 0
            {
                return Err(PtyError::Open(io::Error::last_os_error()));
            }

            let pid = libc::fork();
            if pid < 0 {
                let err = io::Error::last_os_error();
                libc::close(leader_fd);
                libc::close(follower_fd);
                return Err(PtyError::Fork(err));
            }

            if pid == 0 {
                // Child: new session, follower becomes the controlling
                // terminal and stdio. All strings were built before fork.
                libc::close(leader_fd);
                if libc::setsid() < 0 {
                    libc::_exit(1);
                }
                if libc::ioctl(follower_fd, libc::TIOCSCTTY as libc::c_ulong, 0) < 0 {
                    libc::_exit(1);
                }
                libc::dup2(follower_fd, libc::STDIN_FILENO);
                libc::dup2(follower_fd, libc::STDOUT_FILENO);
                libc::dup2(follower_fd, libc::STDERR_FILENO);
                if follower_fd > libc::STDERR_FILENO {
                    libc::close(follower_fd);
                }
                if libc::chdir(workdir.as_ptr()) != 0 {
                    libc::_exit(1);
                }
                let argv: [*const libc::c_char; 4] = [
                    shell.as_ptr(),
                    dash_c.as_ptr(),
                    command.as_ptr(),
                    std::ptr::null(),
                ];
                libc::execvp(shell.as_ptr(), argv.as_ptr());
                libc::_exit(127);
            }

            // Parent: non-blocking leader so the relay loop never stalls.
            let flags = libc::fcntl(leader_fd, libc::F_GETFL);
            libc::fcntl(leader_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);

            debug!(pid, "spawned pty child");
            Ok(Self {
                leader: OwnedFd::from_raw_fd(leader_fd),
                follower: OwnedFd::from_raw_fd(follower_fd),
                pid,
                exit_code: None,
            })
        }
    }

    pub fn leader_fd(&self) -> RawFd {
        self.leader.as_raw_fd()
    }

    /// Whether the follower terminal currently has the ECHO flag set.
    ///
    /// If the query fails the executor assumes echo is on, which keeps the
    /// inactivity timeout armed.
    pub fn echo_enabled(&self) -> bool {
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::tcgetattr(self.follower.as_raw_fd(), &mut term) };
        rc != 0 || (term.c_lflag & libc::ECHO) != 0
    }

    /// Read available bytes from the leader. `Ok(None)` means no data right
    /// now (non-blocking) or the pty has hung up.
    pub fn read_leader(&self) -> Result<Option<Vec<u8>>, PtyError> {
        let mut buf = vec![0u8; 4096];
        let n = unsafe {
            libc::read(
                self.leader.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                // Linux reports EIO on the leader once the child side is gone.
                _ if err.raw_os_error() == Some(libc::EIO) => Ok(None),
                _ => Err(PtyError::Io(err)),
            };
        }
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n as usize);
        Ok(Some(buf))
    }

    /// Write all of `data` to the leader (delivered to the child's stdin).
    pub fn write_leader(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut written = 0;
        while written < data.len() {
            let n = unsafe {
                libc::write(
                    self.leader.as_raw_fd(),
                    data[written..].as_ptr().cast(),
                    data.len() - written,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted
                    || err.kind() == io::ErrorKind::WouldBlock
                {
                    continue;
                }
                return Err(PtyError::Io(err));
            }
            written += n as usize;
        }
        Ok(())
    }

    /// Non-blocking child status check. Returns the exit code once reaped;
    /// signal terminations map to `128 + signo`.
    pub fn try_wait(&mut self) -> Result<Option<i32>, PtyError> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if rc < 0 {
            return Err(PtyError::Io(io::Error::last_os_error()));
        }
        if rc == 0 {
            return Ok(None);
        }
        self.exit_code = Some(decode_wait_status(status));
        Ok(self.exit_code)
    }

    /// Blocking reap; used after a kill so the child never lingers as a zombie.
    pub fn wait(&mut self) -> Result<i32, PtyError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(self.pid, &mut status, 0) };
        if rc < 0 {
            return Err(PtyError::Io(io::Error::last_os_error()));
        }
        let code = decode_wait_status(status);
        self.exit_code = Some(code);
        Ok(code)
    }

    /// SIGKILL the child's whole process group.
    pub fn kill_group(&self) {
        unsafe {
            libc::kill(-self.pid, libc::SIGKILL);
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.exit_code.is_none() {
            unsafe {
                libc::kill(-self.pid, libc::SIGHUP);
                let mut status: libc::c_int = 0;
                libc::waitpid(self.pid, &mut status, libc::WNOHANG);
            }
        }
    }
}

fn decode_wait_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// Readiness report from one multiplexed wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollOutcome {
    pub leader_readable: bool,
    pub operator_readable: bool,
    /// Operator stream reported hangup/error; stop watching it.
    pub operator_gone: bool,
}

/// Poll the pty leader and (optionally) the operator's input fd for up to
/// `timeout`. A zero result with nothing ready is normal: the relay loop uses
/// the short interval to re-check timers and the follower echo flag.
pub fn poll_session(
    leader: RawFd,
    operator: Option<RawFd>,
    timeout: Duration,
) -> Result<PollOutcome, PtyError> {
    let mut fds = [
        libc::pollfd {
            fd: leader,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: operator.unwrap_or(-1),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let nfds: libc::nfds_t = if operator.is_some() { 2 } else { 1 };
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(PollOutcome::default());
        }
        return Err(PtyError::Io(err));
    }

    let mut outcome = PollOutcome::default();
    if fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
        outcome.leader_readable = true;
    }
    if operator.is_some() {
        if fds[1].revents & libc::POLLIN != 0 {
            outcome.operator_readable = true;
        }
        if fds[1].revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            outcome.operator_gone = true;
        }
    }
    Ok(outcome)
}

/// Read once from an arbitrary fd (the operator's input stream).
pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Scoped raw-mode switch for the invoking terminal.
///
/// Saves the current mode on acquisition and restores it on drop, on every
/// exit path including timeout kills. When stdin is not a tty (tests, CI,
/// piped invocations) the guard is a no-op.
pub struct RawModeGuard {
    saved: Option<libc::termios>,
}

impl RawModeGuard {
    pub fn acquire() -> Self {
        let fd = libc::STDIN_FILENO;
        if unsafe { libc::isatty(fd) } == 0 {
            debug!("stdin is not a tty; skipping raw mode");
            return Self { saved: None };
        }
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut term) } != 0 {
            warn!(err = %io::Error::last_os_error(), "tcgetattr failed; skipping raw mode");
            return Self { saved: None };
        }
        let saved = term;
        unsafe { libc::cfmakeraw(&mut term) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &term) } != 0 {
            warn!(err = %io::Error::last_os_error(), "tcsetattr failed; skipping raw mode");
            return Self { saved: None };
        }
        Self { saved: Some(saved) }
    }

    pub fn is_raw(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let Some(saved) = self.saved else {
            return;
        };
        // Best-effort: a restoration failure must not mask the command result.
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &saved) } != 0 {
            warn!(
                err = %io::Error::last_os_error(),
                "failed to restore terminal mode"
            );
        }
    }
}
