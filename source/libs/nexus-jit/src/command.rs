// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shell command synthesis for the cache pipeline.
//!
//! Flags coming from the toolchain are shell words and are passed through verbatim; file paths
//! are quoted so cache directories with spaces survive `sh -c`.

use std::path::Path;

use crate::error::{JitError, Result};
use crate::toolchain::ToolchainConfig;

/// Space-joined command line; empty words are dropped.
#[derive(Debug, Default)]
struct CommandLine {
    words: Vec<String>,
}

impl CommandLine {
    fn new(program: &str) -> Self {
        Self::default().raw(program)
    }

    fn raw(mut self, word: &str) -> Self {
        if !word.is_empty() {
            self.words.push(word.to_string());
        }
        self
    }

    fn path(self, path: &Path) -> Result<Self> {
        self.prefixed_path("", path)
    }

    fn prefixed_path(self, prefix: &str, path: &Path) -> Result<Self> {
        let text = path
            .to_str()
            .ok_or_else(|| JitError::Config(format!("path {} is not valid UTF-8", path.display())))?;
        let word = format!("{prefix}{text}");
        let quoted = shlex::try_quote(&word)
            .map_err(|err| JitError::Config(format!("cannot quote {word:?}: {err}")))?;
        Ok(self.raw(&quoted))
    }

    fn finish(self) -> String {
        self.words.join(" ")
    }
}

/// Relinks the whole archive into the canonical shared library.
pub(crate) fn link_archive(tc: &ToolchainConfig, archive: &Path, library: &Path) -> Result<String> {
    Ok(CommandLine::new(&tc.cxx)
        .raw("-shared")
        .raw("-o")
        .path(library)?
        .raw(&tc.archive_prefix())
        .path(archive)?
        .raw(&tc.archive_suffix())
        .raw(&format!("{}-rpath,.", tc.linker_prefix()))
        .finish())
}

/// Compiles one kernel source into a position-independent object.
pub(crate) fn compile(
    tc: &ToolchainConfig,
    verbose: bool,
    source: &Path,
    object: &Path,
) -> Result<String> {
    let mut line = CommandLine::new(&tc.cxx).raw(&tc.flags);
    for dir in &tc.include_dirs {
        line = line.prefixed_path("-I", dir)?;
    }
    Ok(line
        .raw(tc.device())
        .raw(tc.pic())
        .raw(&tc.pipe())
        .raw("-c")
        .raw("-o")
        .path(object)?
        .path(source)?
        .raw(if verbose { "-v" } else { "" })
        .finish())
}

/// Appends (or replaces) an object in the archive.
pub(crate) fn archive(tc: &ToolchainConfig, archive: &Path, object: &Path) -> Result<String> {
    Ok(CommandLine::new(&tc.ar).raw("-rv").path(archive)?.path(object)?.finish())
}

/// Links the archive into a fresh temporary image.
pub(crate) fn link_image(tc: &ToolchainConfig, archive: &Path, image: &Path) -> Result<String> {
    Ok(CommandLine::new(&tc.cxx)
        .raw("-shared")
        .raw("-o")
        .path(image)?
        .raw(&tc.archive_prefix())
        .path(archive)?
        .raw(&tc.archive_suffix())
        .finish())
}

/// Copies the temporary image over the canonical library. `install` unlinks the destination
/// before copying, so an image already mapped from the old file keeps its contents.
pub(crate) fn install(tc: &ToolchainConfig, image: &Path, library: &Path) -> Result<String> {
    Ok(CommandLine::new("install").raw(tc.backup()).path(image)?.path(library)?.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{Backend, LinkStyle};
    use std::path::PathBuf;

    fn host() -> ToolchainConfig {
        ToolchainConfig { link_style: LinkStyle::Gnu, ..ToolchainConfig::default() }
    }

    #[test]
    fn compile_line_for_host() {
        let cmd = compile(&host(), false, Path::new("./k1.cc"), Path::new("./k1.co")).unwrap();
        assert_eq!(cmd, "c++ -O3 -std=c++17 -fPIC -pipe -c -o ./k1.co ./k1.cc");
    }

    #[test]
    fn compile_line_with_includes_and_verbose() {
        let tc = ToolchainConfig {
            backend: Backend::Cuda,
            cxx: "nvcc".into(),
            include_dirs: vec![PathBuf::from("/opt/my include")],
            ..host()
        };
        let cmd = compile(&tc, true, Path::new("k.cu"), Path::new("k.co")).unwrap();
        assert_eq!(
            cmd,
            "nvcc -O3 -std=c++17 '-I/opt/my include' --device-c -Xcompiler=-fPIC -Xcompiler=-pipe -c -o k.co k.cu -v"
        );
    }

    #[test]
    fn link_lines_wrap_the_archive() {
        let tc = host();
        let lib = Path::new("./libnxjit.so");
        let ar = Path::new("./libnxjit.a");
        assert_eq!(
            link_archive(&tc, ar, lib).unwrap(),
            "c++ -shared -o ./libnxjit.so -Wl,--whole-archive ./libnxjit.a -Wl,--no-whole-archive -Wl,-rpath,."
        );
        assert_eq!(
            link_image(&tc, ar, Path::new("./k1.so")).unwrap(),
            "c++ -shared -o ./k1.so -Wl,--whole-archive ./libnxjit.a -Wl,--no-whole-archive"
        );
    }

    #[test]
    fn apple_lines_drop_empty_words() {
        let tc = ToolchainConfig { link_style: LinkStyle::Apple, ..ToolchainConfig::default() };
        let lib = Path::new("libnxjit.so");
        assert_eq!(install(&tc, Path::new("k1.so"), lib).unwrap(), "install k1.so libnxjit.so");
        assert_eq!(
            link_image(&tc, Path::new("libnxjit.a"), Path::new("k1.so")).unwrap(),
            "c++ -shared -o k1.so -all_load libnxjit.a"
        );
    }

    #[test]
    fn hip_pipe_goes_through_the_host_compiler() {
        let tc = ToolchainConfig { backend: Backend::Hip, cxx: "hipcc".into(), ..host() };
        let cmd = compile(&tc, false, Path::new("k.hip"), Path::new("k.co")).unwrap();
        assert_eq!(cmd, "hipcc -O3 -std=c++17 -fgpu-rdc -fPIC -Xcompiler=-pipe -c -o k.co k.hip");
    }

    #[test]
    fn archive_and_install_lines() {
        let tc = host();
        assert_eq!(
            archive(&tc, Path::new("/tmp/cache dir/libnxjit.a"), Path::new("/tmp/cache dir/k1.co")).unwrap(),
            "ar -rv '/tmp/cache dir/libnxjit.a' '/tmp/cache dir/k1.co'"
        );
        assert_eq!(
            install(&tc, Path::new("k1.so"), Path::new("libnxjit.so")).unwrap(),
            "install --backup=none k1.so libnxjit.so"
        );
    }
}
