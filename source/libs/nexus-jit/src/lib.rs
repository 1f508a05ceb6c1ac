// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Just-in-time kernel compilation with a persistent archive + shared-library cache
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, `tests/lifecycle.rs`, workspace crate `tests/jit_e2e`
//!
//! PUBLIC API:
//!   - Jit::init / Jit::single / Jit::prefork + Prefork::attach: create the context of one rank
//!   - Jit::lookup / Jit::lookup_kernel: resolve a kernel, compiling it on a cache miss
//!   - Jit::finalize: stop the worker and release the shared channel
//!   - JitConfig: run-wide configuration (TOML + NEXUS_JIT_* environment)
//!   - ProcessGroup / LocalGroup / SingleProcess: distributed synchronization seam
//!   - CacheLayout: canonical artifact paths, status and cleanup
//!
//! INVARIANTS:
//!   - Only the root rank owns a compiler worker; only the worker runs toolchain commands.
//!   - A command is checked against the channel capacity before anything is written.
//!   - Every failure is returned as a `JitError`; nothing in this crate exits the process.
//!
//! DEPENDENCIES:
//!   - nexus-shm: shared channel, handshake, polling
//!   - libloading: dlopen/dlsym of the built images
//!   - sha2: content hashes of kernel identities
//!   - shlex: quoting of paths in synthesized commands
//!   - serde + toml: configuration files
//!   - parking_lot: in-process process group
//!
//! ```no_run
//! use nexus_jit::{Jit, JitConfig};
//!
//! # fn main() -> nexus_jit::Result<()> {
//! let mut jit = Jit::single(JitConfig::from_env()?)?;
//! let kernel = jit.lookup(0xABC, "extern \"C\" int sym_ABC() { return 1; }", "sym_ABC")?;
//! // SAFETY: the source above defines `int sym_ABC(void)`.
//! let f: extern "C" fn() -> i32 = unsafe { kernel.cast() };
//! assert_eq!(f(), 1);
//! jit.finalize()?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all, missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(unix))]
compile_error!("nexus-jit forks its compiler worker and loads images with dlopen; only unix hosts are supported");

mod cache;
mod command;
mod config;
mod coordinator;
mod error;
mod group;
mod identity;
mod jit;
mod toolchain;
mod worker;

pub use cache::{CacheLayout, CacheStatus, KernelSymbol};
pub use config::{JitConfig, PollSettings, ENV_VERBOSE};
pub use error::{BuildStep, ErrorKind, JitError, Result};
pub use group::{LocalGroup, ProcessGroup, SingleProcess};
pub use identity::KernelIdentity;
pub use jit::{Jit, Prefork};
pub use toolchain::{Backend, LinkStyle, ToolchainConfig};
pub use worker::{EXIT_LOG_FAILED, EXIT_ORPHANED, EXIT_PANICKED, EXIT_SIGNALED, EXIT_SPAWN_FAILED};
