// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Compiler worker process
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! The worker is a forked copy of the coordinator that only runs `sh -c <command>` on request.
//! It inherits the shared channel, learns its rank through the identity word, and leaves through
//! `_exit` so none of the parent's destructors run twice.
//!
//! The worker leads its own process group. Every shell and compiler it starts joins that group,
//! so killing the group stops a half-finished build before it can touch the cache again.
//!
//! Exit codes: `0` on an exit request or a non-root identity, the failing command's own code
//! otherwise (see the `EXIT_*` constants for the remaining cases).

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use log::{debug, warn};
use nexus_shm::{Incoming, PollPolicy, Responder, SharedChannel};

use crate::error::{JitError, Result};

/// The command could not be started (`sh` missing, fork failure).
pub const EXIT_SPAWN_FAILED: i32 = 127;
/// The command was killed by a signal.
pub const EXIT_SIGNALED: i32 = 125;
/// The coordinator disappeared.
pub const EXIT_ORPHANED: i32 = 124;
/// The command log could not be appended to.
pub const EXIT_LOG_FAILED: i32 = 123;
/// The worker loop panicked. Only reachable in unwinding builds: with `panic = "abort"` (the
/// workspace profiles) a panicking worker dies on `SIGABRT` and reports no exit code.
pub const EXIT_PANICKED: i32 = 101;

/// Budget for the killed process group to drain after the worker itself was reaped.
const GROUP_DRAIN: Duration = Duration::from_millis(10);
const GROUP_DRAIN_ATTEMPTS: u32 = 100;

/// Settings inherited by the forked worker.
#[derive(Clone, Debug)]
pub(crate) struct WorkerSettings {
    pub interval: Duration,
    pub command_log: Option<PathBuf>,
}

/// Handle on the forked worker, reaped at most once.
#[derive(Debug)]
pub(crate) struct WorkerProcess {
    pid: libc::pid_t,
    status: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Forks the worker. `channel` must already be mapped so the child inherits it.
    pub(crate) fn spawn(channel: &SharedChannel, settings: &WorkerSettings) -> Result<Self> {
        // SAFETY: getpid has no preconditions.
        let parent = unsafe { libc::getpid() };
        // SAFETY: the child runs only `serve`, which touches the inherited mapping, spawns shell
        // commands and appends to a file, then leaves through `_exit`.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(JitError::Spawn(io::Error::last_os_error())),
            0 => {
                // SAFETY: moves this fresh child into a group of its own.
                unsafe { libc::setpgid(0, 0) };
                let code = contain(|| serve(channel, settings, parent));
                // SAFETY: terminates the forked child without unwinding into the parent's frames.
                unsafe { libc::_exit(code) }
            }
            pid => {
                // Also set from the parent so the group exists before `spawn` returns; whichever
                // side runs second fails harmlessly.
                // SAFETY: `pid` is our child and has not exec'd.
                unsafe { libc::setpgid(pid, pid) };
                debug!("nexus-jit: spawned compiler worker pid={pid}");
                Ok(Self { pid, status: None })
            }
        }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Non-blocking reap; `Some` once the worker has exited.
    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.reap(libc::WNOHANG)
    }

    /// Blocks until the worker has exited.
    pub(crate) fn wait(&mut self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.reap(0)? {
                return Ok(status);
            }
        }
    }

    /// Kills a wedged worker together with every command it started.
    pub(crate) fn kill_group(&self) {
        if self.status.is_none() {
            // SAFETY: the group is led by our own, not yet reaped, child.
            unsafe { libc::kill(-self.pid, libc::SIGKILL) };
        }
    }

    /// After [`WorkerProcess::kill_group`] and a reap, waits for the rest of the group to go.
    /// Returns `false` if members are still visible once the budget is spent (typically zombies
    /// nobody reaps yet; they can no longer run).
    pub(crate) fn drain_group(&self) -> bool {
        let drained = PollPolicy::every(GROUP_DRAIN)
            .with_max_attempts(GROUP_DRAIN_ATTEMPTS)
            .wait_for(|| (!group_alive(self.pid)).then_some(()))
            .is_ok();
        if !drained {
            warn!("nexus-jit: process group {} still visible after kill", self.pid);
        }
        drained
    }

    fn reap(&mut self, flags: libc::c_int) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let mut raw = 0;
        // SAFETY: `pid` is our child and has not been reaped yet.
        let rc = unsafe { libc::waitpid(self.pid, &mut raw, flags) };
        match rc {
            0 => Ok(None),
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
            _ => {
                let status = ExitStatus::from_raw(raw);
                self.status = Some(status);
                Ok(Some(status))
            }
        }
    }
}

fn group_alive(pgid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only probes for existence.
    let rc = unsafe { libc::kill(-pgid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Runs the child body; a panic becomes [`EXIT_PANICKED`] instead of unwinding into frames the
/// child copied from its parent.
fn contain(body: impl FnOnce() -> i32) -> i32 {
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(EXIT_PANICKED)
}

/// Worker main loop; returns the process exit code.
fn serve(channel: &SharedChannel, settings: &WorkerSettings, parent: libc::pid_t) -> i32 {
    let responder = Responder::new(channel);
    loop {
        match responder.poll() {
            None => {
                // SAFETY: getppid has no preconditions.
                if unsafe { libc::getppid() } != parent {
                    return EXIT_ORPHANED;
                }
                std::thread::sleep(settings.interval);
            }
            Some(Incoming::Identity(rank)) => {
                responder.acknowledge();
                if rank != 0 {
                    return 0;
                }
            }
            Some(Incoming::Call(command)) => {
                if let Some(path) = &settings.command_log {
                    if append_line(path, &command).is_err() {
                        return EXIT_LOG_FAILED;
                    }
                }
                match run(&command) {
                    0 => responder.acknowledge(),
                    code => return code,
                }
            }
            Some(Incoming::Exit) => return 0,
        }
    }
}

/// Runs `command` through the shell and maps its status to a worker exit code.
fn run(command: &str) -> i32 {
    match Command::new("sh").arg("-c").arg(command).status() {
        Ok(status) if status.success() => 0,
        Ok(status) => match status.code() {
            Some(code) if code != 0 => code,
            _ => EXIT_SIGNALED,
        },
        Err(_) => EXIT_SPAWN_FAILED,
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
