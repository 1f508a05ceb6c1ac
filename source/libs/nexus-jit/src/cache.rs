// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: On-disk artifact cache (archive + shared library) and loaded images
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, end-to-end in `tests/jit_e2e`
//!
//! PERSISTED STATE:
//!   - `<cache_dir>/<archive_name>`: every object compiled so far, replaced member-wise by `ar -rv`
//!   - `<cache_dir>/<library_name>`: the archive linked whole into one loadable image
//!
//! INVARIANTS:
//!   - The canonical library is replaced only by `install` of a complete image.
//!   - A loaded image is never unloaded while a `KernelSymbol` from it is alive.
//!   - The dynamic loader deduplicates by path, so each freshly built image is opened under its
//!     own temporary name rather than through the (already opened) canonical path.
//!   - A canonical library that fails to load is treated as absent and rebuilt from the archive.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL};
use libloading::Library;
use log::{debug, warn};

use crate::error::{JitError, Result};
use crate::identity::KernelIdentity;

/// Canonical file locations of one cache directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLayout {
    dir: PathBuf,
    archive: PathBuf,
    library: PathBuf,
}

/// Presence and size of the persisted artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatus {
    /// Archive size in bytes, `None` when absent.
    pub archive_bytes: Option<u64>,
    /// Shared library size in bytes, `None` when absent.
    pub library_bytes: Option<u64>,
}

impl CacheLayout {
    /// Layout rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, archive_name: &str, library_name: &str) -> Self {
        let dir = dir.into();
        Self { archive: dir.join(archive_name), library: dir.join(library_name), dir }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Static archive path.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Canonical shared library path.
    pub fn library(&self) -> &Path {
        &self.library
    }

    /// Generated source file of `id`.
    pub fn source_path(&self, id: &KernelIdentity, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{extension}", id.stem()))
    }

    /// Object file of `id`.
    pub fn object_path(&self, id: &KernelIdentity) -> PathBuf {
        self.dir.join(format!("{}.co", id.stem()))
    }

    /// Temporary image linked while installing `id`.
    pub fn image_path(&self, id: &KernelIdentity) -> PathBuf {
        self.dir.join(format!("{}.so", id.stem()))
    }

    /// Temporary image linked while restoring the library from the archive alone.
    pub fn relink_path(&self) -> PathBuf {
        let mut name = self.library.file_name().unwrap_or_default().to_os_string();
        name.push(".relink");
        self.dir.join(name)
    }

    /// Reports which artifacts exist.
    pub fn status(&self) -> io::Result<CacheStatus> {
        Ok(CacheStatus {
            archive_bytes: file_size(&self.archive)?,
            library_bytes: file_size(&self.library)?,
        })
    }

    /// Removes both artifacts; returns how many files were deleted.
    pub fn clean(&self) -> io::Result<usize> {
        let mut removed = 0;
        for path in [&self.archive, &self.library] {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }
}

fn file_size(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Resolved kernel entry point. Keeps its image loaded.
#[derive(Clone)]
pub struct KernelSymbol {
    addr: NonNull<c_void>,
    image: Arc<Library>,
}

// The address points into an immutable, loaded code mapping that `image` keeps alive.
unsafe impl Send for KernelSymbol {}
unsafe impl Sync for KernelSymbol {}

impl KernelSymbol {
    /// Raw entry point address.
    pub fn as_ptr(&self) -> *const c_void {
        self.addr.as_ptr()
    }

    /// Reinterprets the entry point as `F`, typically an `extern "C" fn` pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a pointer-sized type matching the real signature of the symbol, and the
    /// returned value must not outlive `self`.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
        // SAFETY: upheld by the caller.
        unsafe { std::mem::transmute_copy::<*const c_void, F>(&self.as_ptr()) }
    }

    /// Returns `true` if both symbols come from the same loaded image.
    pub fn same_image(&self, other: &KernelSymbol) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl std::fmt::Debug for KernelSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSymbol").field("addr", &self.addr).finish_non_exhaustive()
    }
}

/// Images loaded during this run plus the symbols resolved from them.
pub(crate) struct ArtifactCache {
    layout: CacheLayout,
    canonical_probed: bool,
    images: Vec<Arc<Library>>,
    memo: HashMap<u64, KernelSymbol>,
}

impl ArtifactCache {
    pub(crate) fn new(layout: CacheLayout) -> Self {
        Self { layout, canonical_probed: false, images: Vec::new(), memo: HashMap::new() }
    }

    pub(crate) fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub(crate) fn memo(&self, hash: u64) -> Option<KernelSymbol> {
        self.memo.get(&hash).cloned()
    }

    pub(crate) fn remember(&mut self, hash: u64, symbol: KernelSymbol) {
        self.memo.insert(hash, symbol);
    }

    /// `true` until the canonical library has been looked at once in this run.
    pub(crate) fn needs_canonical_probe(&self) -> bool {
        !self.canonical_probed
    }

    /// Opens the canonical library if it exists and loads. Called at most once per run: later
    /// opens of the same path would return the stale mapping. An unloadable file (for instance
    /// truncated by an interrupted install) counts as absent.
    pub(crate) fn probe_canonical(&mut self) -> bool {
        self.canonical_probed = true;
        let library = self.layout.library.clone();
        if !library.exists() {
            return false;
        }
        match self.open(&library) {
            Ok(_) => true,
            Err(err) => {
                warn!("nexus-jit: ignoring canonical library: {err}");
                false
            }
        }
    }

    /// Loads an image and retains it for the rest of the run.
    pub(crate) fn open(&mut self, path: &Path) -> Result<Arc<Library>> {
        let target = fs::canonicalize(path)
            .map_err(|err| JitError::Load { path: path.to_path_buf(), reason: err.to_string() })?;
        // SAFETY: the images are produced by our own toolchain invocations; their initializers
        // are trusted like the compiler itself.
        let image = unsafe { UnixLibrary::open(Some(&target), RTLD_LAZY | RTLD_LOCAL) }
            .map_err(|err| JitError::Load { path: target.clone(), reason: err.to_string() })?;
        debug!("nexus-jit: loaded {}", target.display());
        let image = Arc::new(Library::from(image));
        self.images.push(Arc::clone(&image));
        Ok(image)
    }

    /// Searches the retained images, newest first.
    pub(crate) fn resolve(&self, symbol: &str) -> Option<KernelSymbol> {
        self.images.iter().rev().find_map(|image| resolve_in(image, symbol))
    }
}

/// Looks `symbol` up in one image.
pub(crate) fn resolve_in(image: &Arc<Library>, symbol: &str) -> Option<KernelSymbol> {
    // SAFETY: the symbol is read as an opaque address; it is only called through
    // `KernelSymbol::cast`, whose caller vouches for the signature.
    let raw: *mut c_void = unsafe { *image.get::<*mut c_void>(symbol.as_bytes()).ok()? };
    let addr = NonNull::new(raw)?;
    Some(KernelSymbol { addr, image: Arc::clone(image) })
}
