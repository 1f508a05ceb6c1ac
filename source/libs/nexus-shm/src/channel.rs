// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Anonymous `MAP_SHARED` regions carrying one status word and a NUL-terminated command.
//!
//! Both regions are created with `MAP_SHARED | MAP_ANONYMOUS`, so a process forked after
//! [`SharedChannel::allocate`] sees the same physical pages. The status word is accessed only
//! through an `AtomicU32`; the command buffer is written before the status word is published
//! (release) and read after it is observed (acquire).

use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};
use std::io;

use log::{debug, error};
use thiserror::Error;

/// Errors raised by channel allocation, release, and command transfer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `mmap` refused to create a shared anonymous region.
    #[error("failed to map {len} bytes of shared memory: {source}")]
    Map {
        /// Requested mapping length.
        len: usize,
        /// OS error reported by `mmap`.
        source: io::Error,
    },
    /// `munmap` failed while releasing the channel.
    #[error("failed to unmap shared memory: {0}")]
    Unmap(io::Error),
    /// Zero-capacity channels cannot carry a terminated command.
    #[error("channel capacity must be non-zero")]
    ZeroCapacity,
    /// The command plus its terminator does not fit into the buffer.
    #[error("command of {len} bytes does not fit a {capacity}-byte channel")]
    CommandTooLong {
        /// Length of the rejected command in bytes (terminator excluded).
        len: usize,
        /// Capacity of the command buffer.
        capacity: usize,
    },
    /// The command contains a NUL byte and would be truncated on the peer side.
    #[error("command contains an interior NUL byte at offset {0}")]
    InteriorNul(usize),
    /// A request was issued while the peer had not acknowledged the previous one.
    #[error("channel busy: status word is {0:#010x}")]
    Busy(u32),
    /// The word collides with one of the protocol sentinels.
    #[error("word {0:#010x} is reserved by the handshake protocol")]
    ReservedWord(u32),
}

/// Returns the OS page size, the natural capacity of a command buffer.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw <= 0 {
        4096
    } else {
        raw as usize
    }
}

/// One anonymous shared mapping, unmapped exactly once.
struct Mapping {
    base: Option<NonNull<u8>>,
    len: usize,
}

impl Mapping {
    fn shared_anonymous(len: usize) -> Result<Self, ChannelError> {
        // SAFETY: a fresh anonymous mapping at a kernel-chosen address aliases nothing.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(ChannelError::Map { len, source: io::Error::last_os_error() });
        }
        let base = NonNull::new(raw.cast::<u8>()).ok_or_else(|| ChannelError::Map {
            len,
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })?;
        Ok(Self { base: Some(base), len })
    }

    fn as_ptr(&self) -> *mut u8 {
        match self.base {
            Some(base) => base.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    fn unmap(&mut self) -> Result<(), ChannelError> {
        let Some(base) = self.base.take() else {
            return Ok(());
        };
        // SAFETY: `base`/`len` describe a live mapping created by `shared_anonymous`; `take`
        // guarantees it is handed to munmap only once.
        let rc = unsafe { libc::munmap(base.as_ptr().cast(), self.len) };
        if rc != 0 {
            return Err(ChannelError::Unmap(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            error!("nexus-shm: {err}");
        }
    }
}

/// Status word plus command buffer shared between exactly two processes.
///
/// Owned by the process that allocated it. A forked peer inherits the mapping and must leave
/// through `_exit` without running this destructor.
pub struct SharedChannel {
    status: Mapping,
    buffer: Mapping,
    capacity: usize,
}

// The mappings are only touched through atomics (status) or under the handshake's exclusive
// phases (buffer); moving the owner between threads is sound.
unsafe impl Send for SharedChannel {}

impl SharedChannel {
    /// Maps a status word and a `capacity`-byte command buffer.
    ///
    /// The status word starts out as `initial`.
    pub fn allocate(capacity: usize, initial: u32) -> Result<Self, ChannelError> {
        if capacity == 0 {
            return Err(ChannelError::ZeroCapacity);
        }
        let status = Mapping::shared_anonymous(size_of::<AtomicU32>())?;
        let buffer = Mapping::shared_anonymous(capacity)?;
        let channel = Self { status, buffer, capacity };
        channel.store(initial);
        debug!("nexus-shm: mapped channel with {capacity}-byte command buffer");
        Ok(channel)
    }

    /// Maps a channel whose command buffer spans one OS page.
    pub fn with_page_capacity(initial: u32) -> Result<Self, ChannelError> {
        Self::allocate(page_size(), initial)
    }

    /// Size of the command buffer in bytes, terminator included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unmaps both regions, reporting the first failure.
    pub fn release(mut self) -> Result<(), ChannelError> {
        let buffer = self.buffer.unmap();
        let status = self.status.unmap();
        buffer.and(status)
    }

    fn word(&self) -> &AtomicU32 {
        // SAFETY: the status mapping is page aligned, at least 4 bytes long and lives as long as
        // `self`; every access goes through the atomic.
        unsafe { &*(self.status.as_ptr() as *const AtomicU32) }
    }

    pub(crate) fn load(&self) -> u32 {
        self.word().load(Ordering::Acquire)
    }

    pub(crate) fn store(&self, value: u32) {
        self.word().store(value, Ordering::Release);
    }

    /// Checks that `command` can be written without truncation.
    pub(crate) fn check_command(&self, command: &str) -> Result<(), ChannelError> {
        let bytes = command.as_bytes();
        if let Some(offset) = bytes.iter().position(|b| *b == 0) {
            return Err(ChannelError::InteriorNul(offset));
        }
        if bytes.len() + 1 > self.capacity {
            return Err(ChannelError::CommandTooLong { len: bytes.len(), capacity: self.capacity });
        }
        Ok(())
    }

    pub(crate) fn write_command(&self, command: &str) -> Result<(), ChannelError> {
        self.check_command(command)?;
        let bytes = command.as_bytes();
        let dst = self.buffer.as_ptr();
        // SAFETY: `check_command` proved `len + 1 <= capacity`; the buffer is only written by the
        // requester while the status word is READY, so the responder is not reading it.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            dst.add(bytes.len()).write(0);
        }
        Ok(())
    }

    pub(crate) fn read_command(&self) -> String {
        // SAFETY: the responder reads only after observing REQUEST_CALL (acquire), at which point
        // the requester finished writing and will not touch the buffer until READY is published.
        let raw = unsafe { core::slice::from_raw_parts(self.buffer.as_ptr(), self.capacity) };
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl core::fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedChannel")
            .field("capacity", &self.capacity)
            .field("status", &format_args!("{:#010x}", self.load()))
            .finish()
    }
}
