// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Run-wide JIT configuration (defaults, TOML file, environment overlay)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! The configuration is resolved once before [`crate::Jit::init`] and never changes afterwards.
//! Environment lookups are injected so tests do not mutate the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nexus_shm::PollPolicy;
use serde::Deserialize;

use crate::cache::CacheLayout;
use crate::error::{JitError, Result};
use crate::toolchain::{Backend, ToolchainConfig};

/// Environment variable enabling verbose compiler diagnostics.
pub const ENV_VERBOSE: &str = "NEXUS_JIT_VERBOSE";
const ENV_CXX: &str = "NEXUS_JIT_CXX";
const ENV_AR: &str = "NEXUS_JIT_AR";
const ENV_FLAGS: &str = "NEXUS_JIT_FLAGS";
const ENV_BACKEND: &str = "NEXUS_JIT_BACKEND";
const ENV_CACHE_DIR: &str = "NEXUS_JIT_CACHE_DIR";
const ENV_POLL_MS: &str = "NEXUS_JIT_POLL_MS";
const ENV_COMMAND_LOG: &str = "NEXUS_JIT_COMMAND_LOG";

/// Polling settings of the coordinator/worker handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    /// Pause between two probes of the status word.
    pub interval_ms: u64,
    /// Give up waiting for an acknowledgment after this many probes.
    pub max_attempts: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { interval_ms: PollPolicy::DEFAULT_INTERVAL.as_millis() as u64, max_attempts: None }
    }
}

impl PollSettings {
    /// Converts the settings into a channel polling policy.
    pub fn policy(&self) -> PollPolicy {
        PollPolicy { interval: Duration::from_millis(self.interval_ms), max_attempts: self.max_attempts }
    }
}

/// Complete JIT configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    /// Directory holding the archive, the shared library and intermediate files.
    pub cache_dir: PathBuf,
    /// File name of the static archive.
    pub archive_name: String,
    /// File name of the shared library.
    pub library_name: String,
    /// Compiler and linker settings.
    pub toolchain: ToolchainConfig,
    /// Handshake polling.
    pub poll: PollSettings,
    /// Pass `-v` to the compiler.
    pub verbose: bool,
    /// File the worker appends every executed command to.
    pub command_log: Option<PathBuf>,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("."),
            archive_name: "libnxjit.a".to_string(),
            library_name: "libnxjit.so".to_string(),
            toolchain: ToolchainConfig::default(),
            poll: PollSettings::default(),
            verbose: false,
            command_log: None,
        }
    }
}

impl JitConfig {
    /// Parses a TOML document; omitted keys keep their defaults, unknown keys are rejected.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|err| JitError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| JitError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlays `NEXUS_JIT_*` variables obtained through `lookup`.
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(cxx) = lookup(ENV_CXX) {
            self.toolchain.cxx = cxx;
        }
        if let Some(ar) = lookup(ENV_AR) {
            self.toolchain.ar = ar;
        }
        if let Some(flags) = lookup(ENV_FLAGS) {
            self.toolchain.flags = flags;
        }
        if let Some(name) = lookup(ENV_BACKEND) {
            self.toolchain.backend = Backend::parse(&name)
                .ok_or_else(|| JitError::Config(format!("{ENV_BACKEND}: unknown backend `{name}`")))?;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_POLL_MS) {
            self.poll.interval_ms = ms
                .trim()
                .parse()
                .map_err(|_| JitError::Config(format!("{ENV_POLL_MS}: `{ms}` is not a number")))?;
        }
        if let Some(path) = lookup(ENV_COMMAND_LOG) {
            self.command_log = Some(PathBuf::from(path));
        }
        // Presence alone turns diagnostics on.
        if lookup(ENV_VERBOSE).is_some() {
            self.verbose = true;
        }
        self.validate()?;
        Ok(self)
    }

    /// Artifact locations described by this configuration.
    pub fn layout(&self) -> CacheLayout {
        CacheLayout::new(&self.cache_dir, &self.archive_name, &self.library_name)
    }

    /// Rejects settings no build could succeed with.
    pub fn validate(&self) -> Result<()> {
        for (field, name) in [("archive_name", &self.archive_name), ("library_name", &self.library_name)] {
            if name.is_empty() || name.contains('/') {
                return Err(JitError::Config(format!("{field} must be a plain file name, got `{name}`")));
            }
        }
        if self.archive_name == self.library_name {
            return Err(JitError::Config("archive and library must have distinct names".into()));
        }
        if self.toolchain.cxx.trim().is_empty() {
            return Err(JitError::Config("toolchain.cxx must not be empty".into()));
        }
        if self.toolchain.source_extension.is_empty() || self.toolchain.source_extension == "co" {
            return Err(JitError::Config("toolchain.source_extension must differ from `co`".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::LinkStyle;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_use_canonical_names() {
        let config = JitConfig::default();
        assert_eq!(config.archive_name, "libnxjit.a");
        assert_eq!(config.library_name, "libnxjit.so");
        assert_eq!(config.poll.policy(), PollPolicy::default());
        assert!(!config.verbose);
        config.validate().unwrap();
    }

    #[test]
    fn toml_overrides_selected_keys() {
        let config = JitConfig::from_toml_str(
            r#"
cache_dir = "/tmp/kernels"
verbose = true

[toolchain]
cxx = "clang++"
backend = "cuda"
link_style = "apple"
include_dirs = ["/opt/pde/include"]

[poll]
interval_ms = 5
max_attempts = 100
"#,
        )
        .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/kernels"));
        assert!(config.verbose);
        assert_eq!(config.toolchain.cxx, "clang++");
        assert_eq!(config.toolchain.ar, "ar");
        assert_eq!(config.toolchain.backend, Backend::Cuda);
        assert_eq!(config.toolchain.link_style, LinkStyle::Apple);
        assert_eq!(config.toolchain.include_dirs, vec![PathBuf::from("/opt/pde/include")]);
        assert_eq!(config.poll.policy(), PollPolicy::every(Duration::from_millis(5)).with_max_attempts(100));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = JitConfig::from_toml_str("compiler = \"gcc\"").unwrap_err();
        assert!(matches!(err, JitError::Config(_)));
    }

    #[test]
    fn env_overlay_applies() {
        let config = JitConfig::default()
            .apply_env_with(env(&[
                ("NEXUS_JIT_CXX", "g++-13"),
                ("NEXUS_JIT_BACKEND", "hip"),
                ("NEXUS_JIT_POLL_MS", "10"),
                ("NEXUS_JIT_VERBOSE", ""),
                ("NEXUS_JIT_COMMAND_LOG", "/tmp/cmds.log"),
            ]))
            .unwrap();
        assert_eq!(config.toolchain.cxx, "g++-13");
        assert_eq!(config.toolchain.backend, Backend::Hip);
        assert_eq!(config.poll.interval_ms, 10);
        assert!(config.verbose);
        assert_eq!(config.command_log, Some(PathBuf::from("/tmp/cmds.log")));
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        assert!(JitConfig::default().apply_env_with(env(&[("NEXUS_JIT_POLL_MS", "soon")])).is_err());
        assert!(JitConfig::default().apply_env_with(env(&[("NEXUS_JIT_BACKEND", "fpga")])).is_err());
    }

    #[test]
    fn file_names_must_be_plain() {
        let config = JitConfig { library_name: "lib/x.so".into(), ..JitConfig::default() };
        assert!(config.validate().is_err());
        let config = JitConfig { archive_name: "libnxjit.so".into(), ..JitConfig::default() };
        assert!(config.validate().is_err());
    }
}
