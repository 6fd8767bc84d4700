//! Forked worker processes for isolated UDF execution.
//!
//! `IsolatedChild::spawn` forks the current process. The child installs the
//! sandbox policy, runs the UDF body, writes a [`ChildReport`] to a pipe and
//! exits with `_exit`, so no parent state is torn down twice. The parent
//! waits with an optional time budget and kills the child with `SIGKILL`
//! when the budget runs out.

use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::protocol::{ChildReport, read_message, write_message};
use super::sandbox::SandboxContext;

/// Longest sleep between two `waitpid` polls.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handle to a forked UDF process.
pub struct IsolatedChild {
    /// Process ID of the child.
    pid: libc::pid_t,
    /// Read end of the report pipe.
    report: Option<File>,
    /// Whether the child has been reaped.
    reaped: bool,
    /// When the child was forked.
    started: Instant,
}

impl IsolatedChild {
    /// Fork a child that installs the sandbox policy and then runs `body`.
    ///
    /// `body` only ever runs in the child. Returning `Err` from it reports a
    /// callback failure; a panic is reported the same way.
    ///
    /// # Fork safety
    /// Only the calling thread exists in the child. `body` allocates and may
    /// log through `tracing`, so a lock held by another host thread at fork
    /// time (allocator, subscriber writer) can block the child forever. The
    /// parent's `timeout` in [`wait`](Self::wait) is then the only way out;
    /// hosts that fork from a multi-threaded process should not disable it.
    ///
    /// # Errors
    /// Returns an error if the report pipe or the fork cannot be created. In
    /// that case no child exists and `body` was never called.
    pub fn spawn<F>(sandbox: &SandboxContext, body: F) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<(), ChildReport>,
    {
        let (read_end, write_end) = report_pipe()?;

        // SAFETY: the child only runs `body` and then `_exit`s.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        if pid == 0 {
            drop(read_end);
            let report = child_main(sandbox, body);
            let code = report.exit_code();
            let mut pipe = File::from(write_end);
            // Nothing useful to do on failure; the parent falls back to the exit status.
            let _ = write_message(&mut pipe, &report);
            drop(pipe);
            // SAFETY: terminate the child without running parent destructors or atexit handlers.
            unsafe { libc::_exit(code) };
        }

        drop(write_end);
        tracing::debug!("Forked UDF process {}", pid);

        Ok(Self {
            pid,
            report: Some(File::from(read_end)),
            reaped: false,
            started: Instant::now(),
        })
    }

    /// Process ID of the child.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Wait for the child to exit and decode its outcome.
    ///
    /// With `timeout` set, a child still running after the budget is killed
    /// with `SIGKILL` and `Error::Timeout` is returned. The child has been
    /// reaped when this returns, whatever the result.
    pub fn wait(mut self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| self.started + t);
        let mut interval = Duration::from_millis(1);
        let mut status: libc::c_int = 0;

        let timed_out = loop {
            // SAFETY: plain waitpid on our own child.
            let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
            if rc == self.pid {
                break false;
            }
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                self.reaped = true;
                return Err(Error::Ipc(format!("waitpid({}) failed: {}", self.pid, err)));
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::error!("UDF process {} exceeded its time budget, killing it", self.pid);
                self.kill_and_reap(&mut status);
                break true;
            }

            std::thread::sleep(interval);
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        };
        self.reaped = true;

        let elapsed = self.started.elapsed();
        if timed_out {
            return Err(Error::Timeout(elapsed));
        }

        let report: Option<ChildReport> = match self.report.take() {
            Some(pipe) => read_message(&mut drain(pipe)?.as_slice())?,
            None => None,
        };

        let outcome = decode_status(status, report);
        match &outcome {
            Ok(()) => tracing::debug!("UDF process {} completed in {:?}", self.pid, elapsed),
            Err(e) => tracing::error!("UDF process {} failed: {}", self.pid, e),
        }
        outcome
    }

    /// Kill the child immediately and reap it.
    pub fn kill(mut self) {
        let mut status = 0;
        self.kill_and_reap(&mut status);
        self.reaped = true;
    }

    fn kill_and_reap(&mut self, status: &mut libc::c_int) {
        // SAFETY: signalling and reaping our own child.
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
            while libc::waitpid(self.pid, status, 0) < 0 {
                if std::io::Error::last_os_error().kind() != std::io::ErrorKind::Interrupted {
                    break;
                }
            }
        }
    }
}

impl Drop for IsolatedChild {
    fn drop(&mut self) {
        // Never leave a running or zombie child behind.
        if !self.reaped {
            let mut status = 0;
            self.kill_and_reap(&mut status);
        }
    }
}

/// Body of the forked child, up to the point where it reports.
fn child_main<F>(sandbox: &SandboxContext, body: F) -> ChildReport
where
    F: FnOnce() -> std::result::Result<(), ChildReport>,
{
    if let Err(message) = sandbox.install() {
        return ChildReport::sandbox_rejected(message);
    }

    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => ChildReport::Completed,
        Ok(Err(report)) => report,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ChildReport::call_failed("udf", format!("panicked: {}", message))
        }
    }
}

/// Map a raw wait status plus the optional report to a result.
fn decode_status(status: libc::c_int, report: Option<ChildReport>) -> Result<()> {
    if libc::WIFSIGNALED(status) {
        return Err(Error::ChildCrashed {
            signal: libc::WTERMSIG(status),
        });
    }

    let code = if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        -1
    };

    match report {
        Some(report) => {
            let reported = report.exit_code();
            let result = report.into_result();
            if result.is_ok() && code != reported {
                return Err(Error::ChildFailed { code });
            }
            result
        }
        None if code == 0 => {
            tracing::warn!("UDF process exited cleanly without a report");
            Ok(())
        }
        None => Err(Error::ChildFailed { code }),
    }
}

/// Read whatever the reaped child left in the pipe.
///
/// Other children forked concurrently may still hold the write end, so the
/// read is non-blocking rather than waiting for EOF.
fn drain(mut pipe: File) -> Result<Vec<u8>> {
    use std::io::{ErrorKind, Read};
    use std::os::fd::AsRawFd;

    // SAFETY: toggling O_NONBLOCK on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(pipe.as_raw_fd(), libc::F_GETFL);
        libc::fcntl(pipe.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK);
    }

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Ipc(format!("Failed to read report: {}", e))),
        }
    }
    Ok(buf)
}

/// Create the child→parent report pipe.
fn report_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe() fills in.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: both descriptors were just returned by pipe() and are owned here.
    let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    for fd in [&read_end, &write_end] {
        use std::os::fd::AsRawFd;
        // SAFETY: setting FD_CLOEXEC on a descriptor we own.
        unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    }

    Ok((read_end, write_end))
}
