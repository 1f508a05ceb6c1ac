// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel identities: content hash, source text and exported symbol.
//!
//! The hash names every file generated for the kernel (`k<16 hex>.<ext>`, `k<16 hex>.co`, the
//! temporary image) so two distinct hashes never collide on disk. Identical hashes must denote
//! semantically identical compiled output; the cache never compares source text.

use sha2::{Digest, Sha256};

/// A kernel to be resolved through the artifact cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelIdentity {
    hash: u64,
    source: String,
    symbol: String,
}

impl KernelIdentity {
    /// Wraps a caller-computed hash.
    pub fn new(hash: u64, source: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self { hash, source: source.into(), symbol: symbol.into() }
    }

    /// Hashes `source` and `params` and names the symbol after the hash.
    ///
    /// The source must export [`KernelIdentity::symbol_for`] of [`KernelIdentity::hash_of`] with
    /// the same inputs.
    pub fn derive(source: impl Into<String>, params: &[&str]) -> Self {
        let source = source.into();
        let hash = Self::hash_of(&source, params);
        Self { hash, symbol: Self::symbol_for(hash), source }
    }

    /// Stable 64-bit content hash: the first eight bytes of SHA-256 over the source followed by
    /// each parameter, every part NUL-separated.
    pub fn hash_of(source: &str, params: &[&str]) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        for param in params {
            hasher.update([0u8]);
            hasher.update(param.as_bytes());
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    /// Canonical symbol name for `hash`.
    pub fn symbol_for(hash: u64) -> String {
        format!("k{hash:016x}")
    }

    /// Content hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Source text handed to the compiler.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Symbol resolved after loading.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// File stem shared by all intermediate files of this kernel.
    pub(crate) fn stem(&self) -> String {
        Self::symbol_for(self.hash)
    }
}
