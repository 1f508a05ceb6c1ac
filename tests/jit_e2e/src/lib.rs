// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host end-to-end harness for nexus-jit.
//!
//! Drives the real system toolchain (`cc`, `ar`, `install`) against a throwaway cache directory.
//! Kernels are plain C so symbol names are not mangled. Tests call [`toolchain_available`] first
//! and return early on hosts without a C compiler.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nexus_jit::{JitConfig, PollSettings};
use tempfile::TempDir;

/// Isolated cache directory plus the configuration pointing at it.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    /// Creates an empty cache directory.
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}")) }
    }

    /// Cache directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// File the worker appends executed commands to.
    pub fn command_log(&self) -> PathBuf {
        self.path().join("commands.log")
    }

    /// C toolchain configuration with fast polling and a command log.
    pub fn config(&self) -> JitConfig {
        let mut config = JitConfig {
            cache_dir: self.path().to_path_buf(),
            poll: PollSettings { interval_ms: 2, max_attempts: Some(30_000) },
            command_log: Some(self.command_log()),
            ..JitConfig::default()
        };
        config.toolchain.cxx = "cc".to_string();
        config.toolchain.flags = "-O2".to_string();
        config.toolchain.source_extension = "c".to_string();
        config
    }

    /// Commands the worker executed so far.
    pub fn commands(&self) -> Vec<String> {
        std::fs::read_to_string(self.command_log())
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Canonical archive path.
    pub fn archive(&self) -> PathBuf {
        self.config().layout().archive().to_path_buf()
    }

    /// Canonical library path.
    pub fn library(&self) -> PathBuf {
        self.config().layout().library().to_path_buf()
    }

    /// Member names of the archive (`ar t`).
    pub fn archive_members(&self) -> Vec<String> {
        let output = Command::new("ar").arg("t").arg(self.archive()).output();
        match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).lines().map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// C source exporting `int <symbol>(void) { return <value>; }`.
pub fn c_kernel(symbol: &str, value: i32) -> String {
    format!("int {symbol}(void) {{ return {value}; }}\n")
}

/// Returns `true` when `cc`, `ar` and `install` can be run.
pub fn toolchain_available() -> bool {
    let probe = |program: &str, arg: &str| {
        Command::new(program)
            .arg(arg)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    };
    let ok = probe("cc", "--version") && probe("ar", "--version") && probe("install", "--version");
    if !ok {
        eprintln!("jit_e2e: skipping, C toolchain not found on PATH");
    }
    ok
}
