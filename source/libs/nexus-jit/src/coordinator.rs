// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Coordinator side of the worker handshake.
//!
//! Owns the shared channel and the worker handle. Requests are strictly sequential: `call`
//! returns only after the worker acknowledged or died. A dead worker is never respawned; every
//! later request fails with [`JitError::WorkerGone`].

use std::process::ExitStatus;

use log::{debug, error, info};
use nexus_shm::{PollPolicy, Request, Requester, SharedChannel, State};

use crate::error::{BuildStep, JitError, Result};
use crate::worker::{WorkerProcess, WorkerSettings};

pub(crate) struct Coordinator {
    channel: Option<SharedChannel>,
    worker: WorkerProcess,
    policy: PollPolicy,
    sent: u64,
    dead: bool,
}

impl Coordinator {
    /// Maps the channel and forks the worker.
    pub(crate) fn spawn(policy: PollPolicy, settings: &WorkerSettings) -> Result<Self> {
        let channel = SharedChannel::with_page_capacity(State::Ready.word())?;
        let worker = WorkerProcess::spawn(&channel, settings)?;
        Ok(Self { channel: Some(channel), worker, policy, sent: 0, dead: false })
    }

    /// Publishes the caller's rank. Returns `true` if the worker stays alive (rank 0); otherwise
    /// the worker has exited, been reaped, and the channel is released.
    pub(crate) fn handshake(&mut self, rank: u32) -> Result<bool> {
        let channel = self.channel.as_ref().ok_or(JitError::WorkerGone)?;
        Requester::new(channel).send(Request::Identity(rank))?;
        let context = "rank handshake";
        self.wait_ack(context, |code| JitError::WorkerExit { code, context })?;
        debug!("nexus-jit: worker pid={} acknowledged rank {rank}", self.worker.pid());
        if rank == 0 {
            return Ok(true);
        }
        self.teardown()?;
        Ok(false)
    }

    /// Rejects a command that would not fit the channel, without touching shared memory.
    pub(crate) fn check(&self, command: &str) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(JitError::WorkerGone)?;
        Requester::new(channel).check(command)?;
        Ok(())
    }

    /// Runs `command` in the worker and waits for its acknowledgment.
    pub(crate) fn call(&mut self, step: BuildStep, command: &str) -> Result<()> {
        if self.dead {
            return Err(JitError::WorkerGone);
        }
        let channel = self.channel.as_ref().ok_or(JitError::WorkerGone)?;
        let requester = Requester::new(channel);
        requester.check(command)?;
        info!("nexus-jit: {command}");
        requester.send(Request::Call(command))?;
        self.sent += 1;
        self.wait_ack(step.label(), |code| JitError::Build {
            step,
            command: command.to_string(),
            code,
        })
    }

    /// Number of commands handed to the worker so far.
    pub(crate) fn commands_sent(&self) -> u64 {
        self.sent
    }

    pub(crate) fn worker_pid(&self) -> u32 {
        self.worker.pid()
    }

    /// Stops the worker, reaps it and releases the channel.
    pub(crate) fn shutdown(mut self) -> Result<()> {
        self.teardown()
    }

    /// Waits for READY while watching the worker; a worker exit becomes `on_exit(code)`.
    fn wait_ack(
        &mut self,
        context: &'static str,
        on_exit: impl FnOnce(Option<i32>) -> JitError,
    ) -> Result<()> {
        let Some(channel) = self.channel.as_ref() else {
            return Err(JitError::WorkerGone);
        };
        let requester = Requester::new(channel);
        let worker = &mut self.worker;
        let outcome = self.policy.wait_for(|| {
            if requester.is_ready() {
                return Some(Ok(()));
            }
            match worker.try_wait() {
                Ok(None) => None,
                Ok(Some(status)) => Some(Err(status.code())),
                Err(err) => {
                    error!("nexus-jit: cannot poll worker during {context}: {err}");
                    Some(Err(None))
                }
            }
        });
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(code)) => {
                self.dead = true;
                Err(on_exit(code))
            }
            Err(exhausted) => {
                self.dead = true;
                Err(exhausted.into())
            }
        }
    }

    fn teardown(&mut self) -> Result<()> {
        let Some(channel) = self.channel.take() else {
            return Ok(());
        };
        let status = self.stop_worker(&channel);
        channel.release()?;
        let status = status?;
        if status.success() {
            debug!("nexus-jit: worker pid={} exited", self.worker.pid());
            Ok(())
        } else {
            Err(JitError::WorkerExit { code: status.code(), context: "shutdown" })
        }
    }

    fn stop_worker(&mut self, channel: &SharedChannel) -> Result<ExitStatus> {
        let running = self.worker.try_wait().map_err(JitError::Wait)?.is_none();
        let mut killed = false;
        if running {
            let requester = Requester::new(channel);
            if requester.is_ready() {
                requester.send(Request::Exit)?;
            } else {
                // Still busy on a request nobody waits for anymore.
                debug!("nexus-jit: killing busy worker group {}", self.worker.pid());
                self.worker.kill_group();
                killed = true;
            }
        }
        let status = self.worker.wait().map_err(JitError::Wait)?;
        if killed {
            self.worker.drain_group();
        }
        Ok(status)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!("nexus-jit: worker teardown failed: {err}");
        }
    }
}
