//! Process supervision: run an external program to completion or deadline.
//!
//! [`run`] is the whole contract:
//!
//! ```text
//! spawn ──▶ ┌──────────── select! loop ────────────┐ ──▶ InvocationResult
//!           │ stdout chunk ─▶ StreamBuffer          │
//!           │ stderr chunk ─▶ StreamBuffer          │
//!           │ child exit   ─▶ exit status           │
//!           │ deadline     ─▶ kill, reap, drain ────┼──▶ DeadlineExceeded
//!           └───────────────────────────────────────┘
//! ```
//!
//! Both pipes are read from the same task as the exit wait and the timer, so
//! a child that fills one pipe while nobody reads it cannot occur. All four
//! branches are cancel-safe, which is what lets them share one loop. The loop
//! returns on the first deadline firing, so the expiry path runs at most once
//! and a late natural exit is never reported alongside it.
//!
//! On Unix the child leads its own process group. A deadline kill signals the
//! whole group (`SIGTERM`, then `SIGKILL` after [`TERM_GRACE`]), so helpers the
//! tool started die with it. Processes still holding the pipes
//! [`EXIT_LINGER`] after a natural exit are killed the same way.
//!
//! - [`buffer`]     — [`StreamBuffer`] and the channel read-error record
//! - [`deadline`]   — the explicit [`Deadline`] value
//! - [`invocation`] — the [`Invocation`] builder

pub mod buffer;
pub mod deadline;
pub mod invocation;

pub use buffer::{Channel, ChannelReadError, StreamBuffer};
pub use deadline::Deadline;
pub use invocation::Invocation;

use crate::error::SupervisorError;
use serde::Serialize;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 8192;

/// How long to keep reading after a deadline kill before giving up on the
/// pipes (a grandchild may still hold them open).
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on reaping a killed child.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Time between `SIGTERM` and `SIGKILL` to the process group.
pub const TERM_GRACE: Duration = Duration::from_millis(250);

/// How long the pipes may stay open after the child itself exited.
pub const EXIT_LINGER: Duration = Duration::from_millis(500);

/// Terminal snapshot of an invocation that ran to completion.
///
/// A nonzero `exit_code` is still `Ok` from [`run`]: the tool ran and its
/// diagnostics are here. Use [`InvocationResult::into_result`] to treat it as
/// an error.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub program: String,
    /// Exit code; `-1` when the child was terminated by a signal.
    pub exit_code: i32,
    pub stdout: StreamBuffer,
    pub stderr: StreamBuffer,
    /// Channels that hit a read error and were closed early.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub read_errors: Vec<ChannelReadError>,
    pub duration_ms: u64,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a nonzero exit into [`SupervisorError::NonZeroExit`].
    pub fn into_result(self) -> Result<InvocationResult, SupervisorError> {
        if self.success() {
            Ok(self)
        } else {
            Err(SupervisorError::NonZeroExit {
                program: self.program,
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
                read_errors: self.read_errors,
            })
        }
    }
}

/// Both capture buffers plus the read errors seen so far.
#[derive(Default)]
struct Capture {
    stdout: StreamBuffer,
    stderr: StreamBuffer,
    read_errors: Vec<ChannelReadError>,
}

impl Capture {
    /// Record one read outcome. Returns `true` while the channel stays open.
    fn record(&mut self, program: &str, channel: Channel, read: io::Result<usize>, chunk: &[u8]) -> bool {
        match read {
            Ok(0) => {
                debug!(program = %program, %channel, "channel closed");
                false
            }
            Ok(n) => {
                let data = &chunk[..n];
                match channel {
                    Channel::Stdout => {
                        debug!(program = %program, "stdout: {}", String::from_utf8_lossy(data));
                        self.stdout.append(data);
                    }
                    Channel::Stderr => {
                        error!(program = %program, "stderr: {}", String::from_utf8_lossy(data));
                        self.stderr.append(data);
                    }
                }
                true
            }
            Err(e) => {
                warn!(program = %program, %channel, error = %e, "read error; treating channel as closed");
                self.read_errors.push(ChannelReadError {
                    channel,
                    detail: e.to_string(),
                });
                false
            }
        }
    }
}

/// Run `invocation` to completion or deadline.
///
/// # Errors
/// - [`SupervisorError::LaunchFailure`] — program or working directory
///   missing; nothing was spawned.
/// - [`SupervisorError::DeadlineExceeded`] — the deadline fired first (or had
///   already passed); the child is killed and partial output returned.
/// - [`SupervisorError::Wait`] — the OS failed to report the child's status.
pub async fn run(invocation: &Invocation) -> Result<InvocationResult, SupervisorError> {
    let program = invocation.program_name();
    let start = Instant::now();

    if invocation.deadline.is_expired() {
        warn!(program = %program, "deadline already passed; not launching");
        return Err(SupervisorError::DeadlineExceeded {
            program,
            elapsed_ms: 0,
            stdout: StreamBuffer::default(),
            stderr: StreamBuffer::default(),
            read_errors: Vec::new(),
        });
    }

    if !invocation.working_dir.is_dir() {
        return Err(SupervisorError::LaunchFailure {
            program,
            source: io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "working directory '{}' does not exist",
                    invocation.working_dir.display()
                ),
            ),
        });
    }

    info!(
        program = %program,
        args = ?invocation.args,
        cwd = %invocation.working_dir.display(),
        "launching process"
    );

    let mut child = invocation
        .to_command()
        .spawn()
        .map_err(|source| SupervisorError::LaunchFailure {
            program: program.clone(),
            source,
        })?;

    let pgid = child.id();
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout_chunk = vec![0u8; READ_CHUNK];
    let mut stderr_chunk = vec![0u8; READ_CHUNK];
    let mut capture = Capture::default();
    let mut exit_code: Option<i32> = None;

    let expiry = tokio::time::sleep_until(invocation.deadline.instant());
    tokio::pin!(expiry);
    // Re-armed once the child exits; only polled after that.
    let linger = tokio::time::sleep_until(invocation.deadline.instant());
    tokio::pin!(linger);

    while stdout_pipe.is_some() || stderr_pipe.is_some() || exit_code.is_none() {
        tokio::select! {
            read = read_chunk(&mut stdout_pipe, &mut stdout_chunk), if stdout_pipe.is_some() => {
                if !capture.record(&program, Channel::Stdout, read, &stdout_chunk) {
                    stdout_pipe = None;
                }
            }
            read = read_chunk(&mut stderr_pipe, &mut stderr_chunk), if stderr_pipe.is_some() => {
                if !capture.record(&program, Channel::Stderr, read, &stderr_chunk) {
                    stderr_pipe = None;
                }
            }
            status = child.wait(), if exit_code.is_none() => {
                let status = status.map_err(|source| SupervisorError::Wait {
                    program: program.clone(),
                    source,
                })?;
                debug!(program = %program, %status, "child exited; draining pipes");
                exit_code = Some(status.code().unwrap_or(-1));
                linger.as_mut().reset(tokio::time::Instant::now() + EXIT_LINGER);
            }
            _ = &mut linger, if exit_code.is_some() => {
                warn!(
                    program = %program,
                    "output still open {}ms after exit; killing leftover processes",
                    EXIT_LINGER.as_millis()
                );
                kill_group(pgid, &program);
                stdout_pipe = None;
                stderr_pipe = None;
            }
            _ = &mut expiry => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(program = %program, elapsed_ms, "deadline exceeded; terminating child");

                if exit_code.is_none() {
                    terminate(&mut child, pgid, &program).await;
                } else {
                    kill_group(pgid, &program);
                }

                let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    while stdout_pipe.is_some() || stderr_pipe.is_some() {
                        tokio::select! {
                            read = read_chunk(&mut stdout_pipe, &mut stdout_chunk), if stdout_pipe.is_some() => {
                                if !capture.record(&program, Channel::Stdout, read, &stdout_chunk) {
                                    stdout_pipe = None;
                                }
                            }
                            read = read_chunk(&mut stderr_pipe, &mut stderr_chunk), if stderr_pipe.is_some() => {
                                if !capture.record(&program, Channel::Stderr, read, &stderr_chunk) {
                                    stderr_pipe = None;
                                }
                            }
                        }
                    }
                })
                .await;

                return Err(SupervisorError::DeadlineExceeded {
                    program,
                    elapsed_ms,
                    stdout: capture.stdout,
                    stderr: capture.stderr,
                    read_errors: capture.read_errors,
                });
            }
        }
    }

    let exit_code = exit_code.unwrap_or(-1);
    let duration_ms = start.elapsed().as_millis() as u64;

    if exit_code == 0 {
        info!(program = %program, duration_ms, "process completed");
    } else {
        warn!(program = %program, exit_code, duration_ms, "process had non-zero exit");
    }

    Ok(InvocationResult {
        program,
        exit_code,
        stdout: capture.stdout,
        stderr: capture.stderr,
        read_errors: capture.read_errors,
        duration_ms,
    })
}

/// Read one chunk from an optional pipe. `None` reads as EOF.
async fn read_chunk<R: AsyncRead + Unpin>(pipe: &mut Option<R>, chunk: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(p) => p.read(chunk).await,
        None => Ok(0),
    }
}

/// Stop the child's whole process group, then reap the child so no zombie
/// outlives the invocation.
async fn terminate(child: &mut Child, pgid: Option<u32>, program: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        signal_group(pgid, Signal::SIGTERM, program);
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
            debug!(program = %program, "child ignored SIGTERM");
        }
        signal_group(pgid, Signal::SIGKILL, program);
    }
    #[cfg(not(unix))]
    let _ = pgid;

    if let Err(e) = child.start_kill() {
        debug!(program = %program, error = %e, "kill failed (child likely already exited)");
    }
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(program = %program, %status, "child reaped after kill"),
        Ok(Err(e)) => warn!(program = %program, error = %e, "failed to reap killed child"),
        Err(_) => warn!(program = %program, "child did not exit within reap timeout"),
    }
}

/// `SIGKILL` whatever is left of the child's process group.
fn kill_group(pgid: Option<u32>, program: &str) {
    #[cfg(unix)]
    signal_group(pgid, nix::sys::signal::Signal::SIGKILL, program);
    #[cfg(not(unix))]
    let _ = (pgid, program);
}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: nix::sys::signal::Signal, program: &str) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => debug!(program = %program, pgid, ?signal, "signalled process group"),
        // ESRCH: the group is already gone.
        Err(e) => debug!(program = %program, pgid, ?signal, error = %e, "killpg failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32) -> InvocationResult {
        let mut stderr = StreamBuffer::default();
        stderr.append(b"boom\n");
        InvocationResult {
            program: "p2r".into(),
            exit_code,
            stdout: StreamBuffer::default(),
            stderr,
            read_errors: Vec::new(),
            duration_ms: 3,
        }
    }

    #[test]
    fn zero_exit_is_success() {
        let r = result(0);
        assert!(r.success());
        assert!(r.into_result().is_ok());
    }

    #[test]
    fn nonzero_exit_keeps_output_in_error() {
        match result(2).into_result() {
            Err(SupervisorError::NonZeroExit {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr.as_bytes(), b"boom\n");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[test]
    fn nonzero_exit_keeps_read_errors() {
        let mut r = result(1);
        r.read_errors.push(ChannelReadError {
            channel: Channel::Stderr,
            detail: "Input/output error".into(),
        });
        let err = r.into_result().unwrap_err();
        assert_eq!(err.read_errors().len(), 1);
        assert_eq!(err.read_errors()[0].channel, Channel::Stderr);
    }

    #[test]
    fn capture_records_chunks_and_errors() {
        let mut capture = Capture::default();
        assert!(capture.record("t", Channel::Stdout, Ok(3), b"abcdef"));
        assert!(capture.record("t", Channel::Stderr, Ok(2), b"xy"));
        assert!(!capture.record("t", Channel::Stdout, Ok(0), b""));
        assert!(!capture.record(
            "t",
            Channel::Stderr,
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            b""
        ));
        assert_eq!(capture.stdout.as_bytes(), b"abc");
        assert_eq!(capture.stderr.as_bytes(), b"xy");
        assert_eq!(capture.read_errors.len(), 1);
        assert_eq!(capture.read_errors[0].channel, Channel::Stderr);
    }

    #[tokio::test]
    async fn read_error_keeps_bytes_read_before_it() {
        let mut pipe = Some(
            tokio_test::io::Builder::new()
                .read(b"Downloading paper\n")
                .read_error(io::Error::new(io::ErrorKind::Other, "Input/output error"))
                .build(),
        );
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut capture = Capture::default();
        while pipe.is_some() {
            let read = read_chunk(&mut pipe, &mut chunk).await;
            if !capture.record("p2r", Channel::Stderr, read, &chunk) {
                pipe = None;
            }
        }

        assert_eq!(capture.stderr.to_string_lossy(), "Downloading paper\n");
        assert_eq!(
            capture.read_errors,
            vec![ChannelReadError {
                channel: Channel::Stderr,
                detail: "Input/output error".into(),
            }]
        );
        assert!(capture.stdout.is_empty());
    }

    #[tokio::test]
    async fn expired_deadline_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::new("definitely-not-a-real-binary", dir.path(), Deadline::after(Duration::ZERO));
        // An expired deadline short-circuits before the launch attempt.
        let err = run(&inv).await.unwrap_err();
        assert!(err.is_deadline_exceeded());
    }

    #[tokio::test]
    async fn missing_working_dir_is_launch_failure() {
        let inv = Invocation::new(
            "echo",
            "/nonexistent/p2r-relay/workdir",
            Deadline::after(Duration::from_secs(5)),
        );
        match run(&inv).await {
            Err(SupervisorError::LaunchFailure { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected LaunchFailure, got {other:?}"),
        }
    }
}
