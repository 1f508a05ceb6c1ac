// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the JIT coordinator.
//!
//! Every variant is fatal for the run: nothing here is retried. [`JitError::kind`] maps each
//! variant onto the resource / protocol / build / consistency classes so callers can report
//! what went wrong before terminating.

use core::fmt;
use std::io;
use std::path::PathBuf;

use nexus_shm::{ChannelError, PollError};
use thiserror::Error;

/// Result alias for JIT operations.
pub type Result<T> = core::result::Result<T, JitError>;

/// Coarse classification of a [`JitError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shared memory or process resources could not be obtained or released.
    Resource,
    /// The coordinator/worker handshake was violated.
    Protocol,
    /// A step of the compile/link/install sequence failed.
    Build,
    /// Artifacts or cooperating processes are inconsistent.
    Consistency,
    /// The configuration cannot be used.
    Config,
}

/// Step of the cache pipeline a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStep {
    /// Relinking the shared library from an existing archive.
    LinkArchive,
    /// Writing the kernel source file.
    WriteSource,
    /// Compiling the source into an object.
    Compile,
    /// Appending the object to the archive.
    Archive,
    /// Linking the archive into a temporary image.
    LinkImage,
    /// Installing the temporary image over the canonical library.
    Install,
}

impl BuildStep {
    /// Human-readable step name.
    pub const fn label(self) -> &'static str {
        match self {
            Self::LinkArchive => "archive link",
            Self::WriteSource => "source write",
            Self::Compile => "compile",
            Self::Archive => "archive update",
            Self::LinkImage => "image link",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors surfaced by [`crate::Jit`].
#[derive(Debug, Error)]
pub enum JitError {
    /// Channel allocation, release, or command transfer failed.
    #[error("shared channel: {0}")]
    Channel(#[from] ChannelError),
    /// The worker process could not be created.
    #[error("failed to spawn compiler worker: {0}")]
    Spawn(io::Error),
    /// The worker process could not be reaped.
    #[error("failed to reap compiler worker: {0}")]
    Wait(io::Error),
    /// The worker never acknowledged within the configured polling budget.
    #[error("worker did not acknowledge: {0}")]
    Poll(#[from] PollError),
    /// The worker left with an unexpected status.
    #[error("compiler worker exited with {code:?} during {context}")]
    WorkerExit {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// What the coordinator was doing.
        context: &'static str,
    },
    /// A shell command of the pipeline failed; the worker terminated.
    #[error("{step} failed: `{command}` (worker exit {code:?})")]
    Build {
        /// Failing step.
        step: BuildStep,
        /// Command text sent to the worker.
        command: String,
        /// Worker exit code.
        code: Option<i32>,
    },
    /// A file operation of the pipeline failed in the coordinator.
    #[error("{step}: {source}")]
    Io {
        /// Failing step.
        step: BuildStep,
        /// Underlying error.
        source: io::Error,
    },
    /// A previous fatal build error terminated the worker.
    #[error("compiler worker is gone; no further kernels can be built in this run")]
    WorkerGone,
    /// The dynamic loader rejected an image.
    #[error("cannot load {path}: {reason}")]
    Load {
        /// Image path.
        path: PathBuf,
        /// Loader message.
        reason: String,
    },
    /// The symbol is still unresolved after a successful rebuild.
    #[error("symbol `{symbol}` missing after rebuild")]
    SymbolMissing {
        /// Requested symbol.
        symbol: String,
    },
    /// Cooperating processes disagree on the outcome of a build.
    #[error("rank {rank}: synchronization error, a cooperating process failed")]
    Sync {
        /// Rank reporting the mismatch.
        rank: u32,
    },
    /// A non-coordinator attempted to drive the worker.
    #[error("rank {rank} is not the coordinator")]
    NotCoordinator {
        /// Offending rank.
        rank: u32,
    },
    /// Configuration could not be parsed or used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl JitError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Channel(ChannelError::Map { .. })
            | Self::Channel(ChannelError::Unmap(_))
            | Self::Channel(ChannelError::ZeroCapacity)
            | Self::Spawn(_)
            | Self::Wait(_) => ErrorKind::Resource,
            Self::Channel(_) | Self::Poll(_) | Self::WorkerExit { .. } | Self::NotCoordinator { .. } => {
                ErrorKind::Protocol
            }
            Self::Build { .. } | Self::Io { .. } | Self::WorkerGone => ErrorKind::Build,
            Self::Load { .. } | Self::SymbolMissing { .. } | Self::Sync { .. } => {
                ErrorKind::Consistency
            }
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn io(step: BuildStep) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { step, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_a_protocol_error() {
        let err = JitError::from(ChannelError::CommandTooLong { len: 10, capacity: 4 });
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn mapping_failure_is_a_resource_error() {
        let err = JitError::from(ChannelError::Map { len: 4096, source: io::Error::from_raw_os_error(12) });
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn build_error_mentions_step_and_command() {
        let err = JitError::Build { step: BuildStep::Compile, command: "cc -c k.cc".into(), code: Some(1) };
        assert_eq!(err.kind(), ErrorKind::Build);
        let text = err.to_string();
        assert!(text.starts_with("compile failed"));
        assert!(text.contains("cc -c k.cc"));
    }

    #[test]
    fn sync_and_missing_symbols_are_consistency_errors() {
        assert_eq!(JitError::Sync { rank: 2 }.kind(), ErrorKind::Consistency);
        assert_eq!(JitError::SymbolMissing { symbol: "k0".into() }.kind(), ErrorKind::Consistency);
    }
}
