// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: JIT context: cache resolution driven by the single coordinator rank
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: `tests/lifecycle.rs`, `tests/jit_e2e`
//!
//! LOOKUP (collective, every rank calls it with the same arguments in the same order):
//!   1. in-run memo, then every image loaded so far
//!   2. first lookup of the run: everyone opens the canonical library; if any rank could not
//!      (missing or unloadable), root relinks the archive into a temporary image and installs
//!      it, ranks agree, everyone opens the temporary image, root removes it
//!   3. ranks agree on whether anyone missed
//!   4. root writes, compiles, archives, links a temporary image and installs it; ranks agree
//!   5. every rank opens the temporary image and resolves; ranks agree; root removes the image
//!
//! Any error is fatal for the run. After a build failure the worker is gone and later lookups
//! fail with `JitError::WorkerGone`.

use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};

use crate::cache::{resolve_in, ArtifactCache, CacheLayout, KernelSymbol};
use crate::command;
use crate::config::JitConfig;
use crate::coordinator::Coordinator;
use crate::error::{BuildStep, JitError, Result};
use crate::group::{agree, ProcessGroup, SingleProcess};
use crate::identity::KernelIdentity;
use crate::worker::WorkerSettings;

/// JIT context of one rank. Created by [`Jit::init`] (or [`Jit::prefork`]) and consumed by
/// [`Jit::finalize`].
pub struct Jit<G: ProcessGroup = SingleProcess> {
    config: JitConfig,
    group: G,
    coordinator: Option<Coordinator>,
    cache: ArtifactCache,
}

/// Channel and worker created before the process group exists.
///
/// Every process of a distributed job calls [`Jit::prefork`] before initializing its
/// communication runtime, then [`Prefork::attach`] once its rank is known. Workers attached to
/// non-root ranks exit right away.
pub struct Prefork {
    config: JitConfig,
    coordinator: Coordinator,
}

impl Prefork {
    /// Sends the rank to the worker and builds the context.
    pub fn attach<G: ProcessGroup>(self, group: G) -> Result<Jit<G>> {
        let Prefork { config, mut coordinator } = self;
        let keep = coordinator.handshake(group.rank())?;
        let coordinator = if keep {
            Some(coordinator)
        } else {
            coordinator.shutdown()?;
            None
        };
        Ok(Jit::assemble(config, group, coordinator))
    }

    /// Process id of the (not yet attached) worker.
    pub fn worker_pid(&self) -> u32 {
        self.coordinator.worker_pid()
    }
}

impl Jit<SingleProcess> {
    /// Single-process context.
    pub fn single(config: JitConfig) -> Result<Self> {
        Self::init(config, SingleProcess)
    }

    /// Maps the channel and forks the worker ahead of the process group.
    pub fn prefork(config: JitConfig) -> Result<Prefork> {
        config.validate()?;
        let coordinator = Coordinator::spawn(config.poll.policy(), &worker_settings(&config))?;
        Ok(Prefork { config, coordinator })
    }
}

impl<G: ProcessGroup> Jit<G> {
    /// Creates the context of one rank. Only the root maps a channel and forks a worker.
    pub fn init(config: JitConfig, group: G) -> Result<Self> {
        config.validate()?;
        let coordinator = if group.is_root() {
            let settings = worker_settings(&config);
            let mut coordinator = Coordinator::spawn(config.poll.policy(), &settings)?;
            coordinator.handshake(group.rank())?;
            Some(coordinator)
        } else {
            None
        };
        debug!("nexus-jit: rank {}/{} initialized", group.rank(), group.size());
        Ok(Self::assemble(config, group, coordinator))
    }

    fn assemble(config: JitConfig, group: G, coordinator: Option<Coordinator>) -> Self {
        let cache = ArtifactCache::new(config.layout());
        Self { config, group, coordinator, cache }
    }

    /// Resolves `symbol`, compiling `source` under `hash` on a cache miss.
    pub fn lookup(&mut self, hash: u64, source: &str, symbol: &str) -> Result<KernelSymbol> {
        self.lookup_kernel(&KernelIdentity::new(hash, source, symbol))
    }

    /// Same as [`Jit::lookup`] for a prepared identity.
    pub fn lookup_kernel(&mut self, id: &KernelIdentity) -> Result<KernelSymbol> {
        if let Some(hit) = self.cache.memo(id.hash()) {
            return Ok(hit);
        }
        if self.cache.needs_canonical_probe() {
            self.probe_canonical()?;
        }

        let found = self.cache.resolve(id.symbol());
        let anyone_missed = self.group.any_failed(found.is_none());
        if let (Some(symbol), false) = (&found, anyone_missed) {
            debug!("nexus-jit: hit {} ({:016x})", id.symbol(), id.hash());
            self.cache.remember(id.hash(), symbol.clone());
            return Ok(symbol.clone());
        }

        debug!("nexus-jit: miss {} ({:016x})", id.symbol(), id.hash());
        let built = if self.group.is_root() { self.build(id) } else { Ok(()) };
        agree(&self.group, built)?;

        let symbol = self.load_fresh(id)?;
        self.cache.remember(id.hash(), symbol.clone());
        Ok(symbol)
    }

    /// Opens the canonical library on every rank. If any rank could not load it, the root
    /// rebuilds it from the archive (when there is one) and every rank opens the rebuilt image.
    fn probe_canonical(&mut self) -> Result<()> {
        let loaded = self.cache.probe_canonical();
        if !self.group.any_failed(!loaded) {
            return Ok(());
        }
        let relinked = if self.group.is_root() { self.relink_archive() } else { Ok(false) };
        let relinked = agree(&self.group, relinked)?;
        // The OR-reduction hands the root's answer to every rank.
        if !self.group.any_failed(relinked) {
            return Ok(());
        }

        let image = self.cache.layout().relink_path();
        let opened = self.cache.open(&image).map(drop);
        let agreed = agree(&self.group, opened);
        if self.group.is_root() {
            remove_quietly(&image);
        }
        agreed
    }

    /// Links the lone archive into a temporary image and installs it; root only. Returns `false`
    /// when there is no archive to restore from.
    fn relink_archive(&mut self) -> Result<bool> {
        let tc = &self.config.toolchain;
        let layout = self.cache.layout();
        if !layout.archive().exists() {
            return Ok(false);
        }
        let image = layout.relink_path();
        let steps = [
            (BuildStep::LinkArchive, command::link_archive(tc, layout.archive(), &image)?),
            (BuildStep::Install, command::install(tc, &image, layout.library())?),
        ];

        let coordinator = self.coordinator()?;
        for (_, cmd) in &steps {
            coordinator.check(cmd)?;
        }
        let outcome = steps.iter().try_for_each(|(step, cmd)| coordinator.call(*step, cmd));
        if outcome.is_err() {
            remove_quietly(&image);
        }
        outcome.map(|()| true)
    }

    /// Compile-and-install sequence; root only.
    fn build(&mut self, id: &KernelIdentity) -> Result<()> {
        let tc = &self.config.toolchain;
        let layout = self.cache.layout();
        let source = layout.source_path(id, &tc.source_extension);
        let object = layout.object_path(id);
        let image = layout.image_path(id);
        let steps = [
            (BuildStep::Compile, command::compile(tc, self.config.verbose, &source, &object)?),
            (BuildStep::Archive, command::archive(tc, layout.archive(), &object)?),
            (BuildStep::LinkImage, command::link_image(tc, layout.archive(), &image)?),
            (BuildStep::Install, command::install(tc, &image, layout.library())?),
        ];

        let coordinator = self.coordinator()?;
        for (_, cmd) in &steps {
            coordinator.check(cmd)?;
        }
        fs::write(&source, id.source()).map_err(JitError::io(BuildStep::WriteSource))?;
        let outcome = steps.iter().try_for_each(|(step, cmd)| coordinator.call(*step, cmd));
        remove_quietly(&source);
        remove_quietly(&object);
        if outcome.is_err() {
            remove_quietly(&image);
        }
        outcome
    }

    /// Opens the freshly built image on every rank and resolves the symbol from it.
    fn load_fresh(&mut self, id: &KernelIdentity) -> Result<KernelSymbol> {
        let image = self.cache.layout().image_path(id);
        let loaded = self.cache.open(&image).and_then(|handle| {
            resolve_in(&handle, id.symbol())
                .ok_or_else(|| JitError::SymbolMissing { symbol: id.symbol().to_string() })
        });
        let agreed = agree(&self.group, loaded);
        if self.group.is_root() {
            remove_quietly(&image);
        }
        agreed
    }

    fn coordinator(&mut self) -> Result<&mut Coordinator> {
        let rank = self.group.rank();
        match self.coordinator.as_mut() {
            Some(coordinator) => Ok(coordinator),
            None if self.group.is_root() => Err(JitError::WorkerGone),
            None => Err(JitError::NotCoordinator { rank }),
        }
    }

    /// Cache layout of this context.
    pub fn layout(&self) -> &CacheLayout {
        self.cache.layout()
    }

    /// Configuration the context was created with.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Process group of this rank.
    pub fn group(&self) -> &G {
        &self.group
    }

    /// Commands handed to the worker by this rank (always 0 off the root).
    pub fn commands_sent(&self) -> u64 {
        self.coordinator.as_ref().map_or(0, Coordinator::commands_sent)
    }

    /// Process id of the worker, if this rank owns one.
    pub fn worker_pid(&self) -> Option<u32> {
        self.coordinator.as_ref().map(Coordinator::worker_pid)
    }

    /// Stops the worker and releases the channel. Loaded images stay mapped while any returned
    /// [`KernelSymbol`] is alive.
    pub fn finalize(self) -> Result<()> {
        let Self { coordinator, group, .. } = self;
        match coordinator {
            Some(coordinator) => {
                coordinator.shutdown()?;
                debug!("nexus-jit: rank {} finalized", group.rank());
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn worker_settings(config: &JitConfig) -> WorkerSettings {
    WorkerSettings {
        interval: config.poll.policy().interval,
        command_log: config.command_log.clone(),
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("nexus-jit: cannot remove {}: {err}", path.display()),
    }
}
