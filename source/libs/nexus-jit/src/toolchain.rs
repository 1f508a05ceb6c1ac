// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compiler and linker flag providers.
//!
//! The set of targets is closed: {host, CUDA, HIP} × {GNU-style, Apple-style linker}. Both axes
//! are resolved once at startup and never change for the run.

use std::path::PathBuf;

use serde::Deserialize;

/// Code-generation backend the kernels are compiled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Host CPU.
    #[default]
    Host,
    /// NVIDIA accelerator through `nvcc`.
    Cuda,
    /// AMD accelerator through `hipcc`.
    Hip,
}

impl Backend {
    /// Parses the lowercase backend name used in configuration files and the environment.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Some(Self::Host),
            "cuda" => Some(Self::Cuda),
            "hip" => Some(Self::Hip),
            _ => None,
        }
    }
}

/// Linker conventions for whole-archive linking and installs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStyle {
    /// GNU ld / coreutils `install`.
    Gnu,
    /// Apple ld64 / BSD `install`.
    Apple,
}

impl LinkStyle {
    /// Linker style of the platform this crate was built for.
    pub const fn detect() -> Self {
        if cfg!(target_vendor = "apple") {
            Self::Apple
        } else {
            Self::Gnu
        }
    }
}

impl Default for LinkStyle {
    fn default() -> Self {
        Self::detect()
    }
}

/// Toolchain used to assemble every build command.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Compiler driver, also used as the linker.
    pub cxx: String,
    /// Archiver.
    pub ar: String,
    /// Base compile flags.
    pub flags: String,
    /// Extra include directories passed as `-I`.
    pub include_dirs: Vec<PathBuf>,
    /// Extension of generated source files; selects the language for the compiler driver.
    pub source_extension: String,
    /// Code-generation backend.
    pub backend: Backend,
    /// Linker conventions.
    pub link_style: LinkStyle,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cxx: "c++".to_string(),
            ar: "ar".to_string(),
            flags: "-O3 -std=c++17".to_string(),
            include_dirs: Vec::new(),
            source_extension: "cc".to_string(),
            backend: Backend::Host,
            link_style: LinkStyle::detect(),
        }
    }
}

impl ToolchainConfig {
    /// Position-independent-code flag.
    pub fn pic(&self) -> &'static str {
        match self.backend {
            Backend::Cuda => "-Xcompiler=-fPIC",
            Backend::Host | Backend::Hip => "-fPIC",
        }
    }

    /// Pipe flag (use pipes instead of temporary files between compiler stages), forwarded to
    /// the host compiler behind a device driver.
    pub fn pipe(&self) -> String {
        format!("{}-pipe", self.compiler_prefix())
    }

    /// Relocatable device-code flag; empty on the host.
    pub fn device(&self) -> &'static str {
        match self.backend {
            Backend::Host => "",
            Backend::Cuda => "--device-c",
            Backend::Hip => "-fgpu-rdc",
        }
    }

    /// Prefix forwarding an option to the host compiler behind a device driver.
    pub fn compiler_prefix(&self) -> &'static str {
        match self.backend {
            Backend::Host => "",
            Backend::Cuda | Backend::Hip => "-Xcompiler=",
        }
    }

    /// Prefix forwarding an option to the linker.
    pub fn linker_prefix(&self) -> &'static str {
        match self.backend {
            Backend::Host => "-Wl,",
            Backend::Cuda | Backend::Hip => "-Xlinker=",
        }
    }

    /// Option placed before the archive so every member is linked.
    pub fn archive_prefix(&self) -> String {
        match (self.link_style, self.backend) {
            (LinkStyle::Apple, _) => "-all_load".to_string(),
            (LinkStyle::Gnu, Backend::Hip) => "-Wl,--whole-archive".to_string(),
            (LinkStyle::Gnu, _) => format!("{}--whole-archive", self.linker_prefix()),
        }
    }

    /// Option placed after the archive to restore default member selection.
    pub fn archive_suffix(&self) -> String {
        match (self.link_style, self.backend) {
            (LinkStyle::Apple, _) => String::new(),
            (LinkStyle::Gnu, Backend::Hip) => "-Wl,--no-whole-archive".to_string(),
            (LinkStyle::Gnu, _) => format!("{}--no-whole-archive", self.linker_prefix()),
        }
    }

    /// Backup policy handed to `install`.
    pub fn backup(&self) -> &'static str {
        match self.link_style {
            LinkStyle::Gnu => "--backup=none",
            LinkStyle::Apple => "",
        }
    }
}
