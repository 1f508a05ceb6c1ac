// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory command channel between a coordinator and its worker process
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (channel, protocol, poll) + `tests/fork_handshake.rs`
//!
//! PUBLIC API:
//!   - SharedChannel: status word + fixed-capacity command buffer in anonymous shared mappings
//!   - Requester / Responder: the two ends of the READY / REQUEST_CALL / REQUEST_EXIT handshake
//!   - PollPolicy: bounded-interval polling with an optional attempt budget
//!
//! INVARIANTS:
//!   - The channel must be allocated before the peer process is forked; the mapping is
//!     inherited, never re-established.
//!   - `len(command) + 1 <= capacity` is checked before any byte is written.
//!   - Each mapping is unmapped exactly once (explicit `release` or drop).
//!   - No raw address escapes this crate.

#![deny(clippy::all, missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(unix))]
compile_error!("nexus-shm requires anonymous shared mappings (mmap); only unix hosts are supported");

mod channel;
mod poll;
mod protocol;

pub use channel::{page_size, ChannelError, SharedChannel};
pub use poll::{PollError, PollPolicy, Sleep, ThreadSleep};
pub use protocol::{Incoming, Request, Requester, Responder, State};
