// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Distributed synchronization between cooperating ranks
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - trait ProcessGroup: rank/size plus the failure-OR collective
//!   - struct SingleProcess: one-rank group, every collective is local
//!   - struct LocalGroup: N ranks inside one process (one thread per rank)
//!
//! INVARIANTS:
//!   - Only rank 0 (the root) drives the compiler worker.
//!   - Every rank calls the collectives in the same order; a rank that skips one deadlocks
//!     the others.
//!   - Failure flags are combined by logical OR; a rank whose own step succeeded but sees a
//!     combined failure reports `JitError::Sync`.
//!
//! DEPENDENCIES:
//!   - parking_lot::{Mutex, Condvar}: generation barrier of LocalGroup
//!
//! TEST SCENARIOS:
//!   - single_process_is_local(): the one-rank group echoes its own flag
//!   - local_group_ors_failures(): one failing rank is seen by all
//!   - local_group_reuses_rounds(): consecutive collectives do not bleed into each other
//!   - agree_prefers_local_error(): local errors win over the combined flag

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{JitError, Result};

/// Set of cooperating processes sharing one artifact cache.
pub trait ProcessGroup {
    /// Rank of the calling member, `0..size`.
    fn rank(&self) -> u32;

    /// Number of members.
    fn size(&self) -> u32;

    /// Returns `true` for the member allowed to build.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Collective: combines `failed` by logical OR across every member and returns the result.
    fn any_failed(&self, failed: bool) -> bool;
}

impl<G: ProcessGroup + ?Sized> ProcessGroup for &G {
    fn rank(&self) -> u32 {
        (**self).rank()
    }

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn any_failed(&self, failed: bool) -> bool {
        (**self).any_failed(failed)
    }
}

/// Group made of the calling process only.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn any_failed(&self, failed: bool) -> bool {
        failed
    }
}

#[derive(Debug, Default)]
struct Round {
    generation: u64,
    arrived: u32,
    failed: bool,
    outcome: bool,
}

#[derive(Debug)]
struct Shared {
    size: u32,
    round: Mutex<Round>,
    complete: Condvar,
}

/// One member of an in-process group; each member is meant to run on its own thread.
#[derive(Clone, Debug)]
pub struct LocalGroup {
    rank: u32,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Creates the `size` members of a new group, ordered by rank.
    pub fn new(size: u32) -> Vec<Self> {
        let shared = Arc::new(Shared {
            size: size.max(1),
            round: Mutex::new(Round::default()),
            complete: Condvar::new(),
        });
        (0..size.max(1)).map(|rank| Self { rank, shared: Arc::clone(&shared) }).collect()
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.shared.size
    }

    fn any_failed(&self, failed: bool) -> bool {
        let mut round = self.shared.round.lock();
        let generation = round.generation;
        round.failed |= failed;
        round.arrived += 1;
        if round.arrived == self.shared.size {
            round.outcome = round.failed;
            round.failed = false;
            round.arrived = 0;
            round.generation = round.generation.wrapping_add(1);
            self.shared.complete.notify_all();
            return round.outcome;
        }
        while round.generation == generation {
            self.shared.complete.wait(&mut round);
        }
        // The next round cannot complete before this member arrives, so `outcome` is ours.
        round.outcome
    }
}

/// Runs the failure-OR collective over `outcome`.
///
/// A local error is returned as is; a local success with a remote failure becomes
/// [`JitError::Sync`].
pub(crate) fn agree<T>(group: &impl ProcessGroup, outcome: Result<T>) -> Result<T> {
    let any_failed = group.any_failed(outcome.is_err());
    match outcome {
        Ok(_) if any_failed => Err(JitError::Sync { rank: group.rank() }),
        other => other,
    }
}
