// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bounded-interval polling used by both ends of the handshake.
//!
//! Neither side blocks in the kernel: a waiter probes the status word, sleeps for a fixed
//! interval, and probes again. The attempt budget is explicit so test environments can fail fast
//! instead of waiting forever on a peer that will never answer.

use core::time::Duration;

use thiserror::Error;

/// Errors returned by [`PollPolicy::wait_for`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PollError {
    /// The probe never succeeded within the attempt budget.
    #[error("condition not reached after {attempts} polls")]
    Exhausted {
        /// Number of probes performed.
        attempts: u32,
    },
}

/// Pause source between probes.
pub trait Sleep {
    /// Suspends the caller for roughly `interval`.
    fn sleep(&self, interval: Duration);
}

/// Sleeps the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, interval: Duration) {
        if interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(interval);
        }
    }
}

/// How often to probe and how many probes to allow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between two probes.
    pub interval: Duration,
    /// Give up after this many probes; `None` waits indefinitely.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    /// Compiler latency dominates the handshake, so a coarse interval is enough.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

    /// Unbounded policy probing every `interval`.
    pub const fn every(interval: Duration) -> Self {
        Self { interval, max_attempts: None }
    }

    /// Returns a copy that gives up after `attempts` probes.
    pub const fn with_max_attempts(self, attempts: u32) -> Self {
        Self { interval: self.interval, max_attempts: Some(attempts) }
    }

    /// Probes until `probe` yields a value, sleeping the current thread between probes.
    pub fn wait_for<T>(&self, probe: impl FnMut() -> Option<T>) -> Result<T, PollError> {
        self.wait_for_with(&ThreadSleep, probe)
    }

    /// Same as [`PollPolicy::wait_for`] with an explicit pause source.
    pub fn wait_for_with<T>(
        &self,
        sleeper: &impl Sleep,
        mut probe: impl FnMut() -> Option<T>,
    ) -> Result<T, PollError> {
        let mut attempts: u32 = 0;
        loop {
            if let Some(value) = probe() {
                return Ok(value);
            }
            attempts = attempts.saturating_add(1);
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Err(PollError::Exhausted { attempts });
                }
            }
            sleeper.sleep(self.interval);
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::every(Self::DEFAULT_INTERVAL)
    }
}
