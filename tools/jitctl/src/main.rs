// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! jitctl: compile, run and inspect kernels in a nexus-jit cache.
//!
//! Configuration is layered: defaults, then `--config <file.toml>`, then `NEXUS_JIT_*`
//! variables, then `--cache-dir`. Logging goes through `RUST_LOG`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::debug;
use nexus_jit::{Jit, JitConfig, JitError, KernelIdentity};

#[derive(Debug, Parser)]
#[command(name = "jitctl", version, about = "Drive the nexus-jit kernel cache")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the cache directory.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Resolve a kernel, compiling it on a cache miss.
    Build(KernelArgs),
    /// Resolve a kernel and call it as `int (*)(void)`.
    Run(KernelArgs),
    /// Show the cache artifacts.
    Status,
    /// Delete the cache artifacts.
    Clean,
}

#[derive(Debug, Args)]
struct KernelArgs {
    /// Kernel source file.
    source: PathBuf,
    /// Exported symbol; defaults to the name derived from the hash.
    #[arg(long)]
    symbol: Option<String>,
    /// Content hash in hex; defaults to a hash of the source (and symbol).
    #[arg(long, value_parser = parse_hash)]
    hash: Option<u64>,
}

fn parse_hash(text: &str) -> Result<u64, String> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|err| format!("invalid hex hash `{text}`: {err}"))
}

/// Builds the identity from whatever the user pinned down.
fn identity(source: String, symbol: Option<String>, hash: Option<u64>) -> KernelIdentity {
    match (symbol, hash) {
        (Some(symbol), Some(hash)) => KernelIdentity::new(hash, source, symbol),
        (Some(symbol), None) => {
            let hash = KernelIdentity::hash_of(&source, &[&symbol]);
            KernelIdentity::new(hash, source, symbol)
        }
        (None, Some(hash)) => KernelIdentity::new(hash, source, KernelIdentity::symbol_for(hash)),
        (None, None) => KernelIdentity::derive(source, &[]),
    }
}

fn load_config(cli: &Cli) -> Result<JitConfig, JitError> {
    let base = match &cli.config {
        Some(path) => JitConfig::load(path)?,
        None => JitConfig::default(),
    };
    let mut config = base.apply_env_with(|key| std::env::var(key).ok())?;
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn resolve(config: JitConfig, args: &KernelArgs, call: bool) -> Result<(), JitError> {
    let text = std::fs::read_to_string(&args.source)
        .map_err(|err| JitError::Config(format!("{}: {err}", args.source.display())))?;
    let id = identity(text, args.symbol.clone(), args.hash);
    let mut jit = Jit::single(config)?;
    let kernel = jit.lookup_kernel(&id)?;
    println!("{} ({:016x}) at {:p}", id.symbol(), id.hash(), kernel.as_ptr());
    if call {
        // SAFETY: `run` is documented to require an `int (*)(void)` entry point.
        let entry: extern "C" fn() -> i32 = unsafe { kernel.cast() };
        println!("{}", entry());
    }
    debug!("jitctl: {} command(s) sent to the worker", jit.commands_sent());
    jit.finalize()
}

fn run(cli: Cli) -> Result<(), JitError> {
    let config = load_config(&cli)?;
    match &cli.command {
        Cmd::Build(args) => resolve(config, args, false),
        Cmd::Run(args) => resolve(config, args, true),
        Cmd::Status => {
            let layout = config.layout();
            let status = layout.status().map_err(|err| JitError::Config(err.to_string()))?;
            for (path, size) in [(layout.archive(), status.archive_bytes), (layout.library(), status.library_bytes)] {
                match size {
                    Some(bytes) => println!("{}: {bytes} bytes", path.display()),
                    None => println!("{}: absent", path.display()),
                }
            }
            Ok(())
        }
        Cmd::Clean => {
            let layout = config.layout();
            let removed = layout.clean().map_err(|err| JitError::Config(err.to_string()))?;
            println!("removed {removed} file(s)");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("jitctl: {err} [{:?}]", err.kind());
            ExitCode::FAILURE
        }
    }
}
