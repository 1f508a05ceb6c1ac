// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: End-to-end kernel cache scenarios against the host C toolchain
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 9 integration tests
//!
//! TEST_SCENARIOS:
//!   - empty_cache_builds_callable_kernel(): archive + library created, symbol returns 1
//!   - second_lookup_never_recompiles(): same run and next run add no commands
//!   - distinct_hashes_get_distinct_members(): two objects in the archive, both callable
//!   - library_hit_ignores_broken_archive(): library-first short-circuit
//!   - lone_archive_is_relinked(): link + install, no compile
//!   - truncated_library_is_relinked(): unloadable library restored from the archive
//!   - failing_compiler_keeps_previous_library(): build error, library bytes unchanged
//!   - finalize_leaves_no_worker(): worker process gone after finalize
//!   - ranks_share_one_build(): three in-process ranks, one worker, one build

use std::thread;

use jit_e2e::{c_kernel, toolchain_available, Sandbox};
use nexus_jit::{BuildStep, ErrorKind, Jit, JitError, KernelIdentity, KernelSymbol, LocalGroup, ProcessGroup};

fn call(symbol: &KernelSymbol) -> i32 {
    // SAFETY: every kernel in these tests is `int f(void)`.
    let entry: extern "C" fn() -> i32 = unsafe { symbol.cast() };
    entry()
}

#[test]
fn empty_cache_builds_callable_kernel() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();

    let symbol = jit.lookup(0xABC, &c_kernel("sym_ABC", 1), "sym_ABC").unwrap();
    assert_eq!(call(&symbol), 1);
    assert!(sandbox.archive().exists());
    assert!(sandbox.library().exists());
    assert_eq!(sandbox.archive_members(), vec!["k0000000000000abc.co".to_string()]);
    // Intermediates and the temporary image are gone.
    assert!(!sandbox.path().join("k0000000000000abc.c").exists());
    assert!(!sandbox.path().join("k0000000000000abc.co").exists());
    assert!(!sandbox.path().join("k0000000000000abc.so").exists());

    jit.finalize().unwrap();
    // Loaded images outlive the context.
    assert_eq!(call(&symbol), 1);
}

#[test]
fn second_lookup_never_recompiles() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let source = c_kernel("sym_idem", 5);

    let mut jit = Jit::single(sandbox.config()).unwrap();
    jit.lookup(0x1DE, &source, "sym_idem").unwrap();
    let first = sandbox.commands();
    assert_eq!(first.len(), 4, "{first:#?}");
    assert!(first[0].starts_with("cc -O2 "));
    assert!(first[1].starts_with("ar -rv "));
    assert!(first[3].starts_with("install "));

    let again = jit.lookup(0x1DE, &source, "sym_idem").unwrap();
    assert_eq!(call(&again), 5);
    assert_eq!(sandbox.commands().len(), 4);
    assert_eq!(jit.commands_sent(), 4);
    jit.finalize().unwrap();

    // A new run hits the persisted library.
    let mut jit = Jit::single(sandbox.config()).unwrap();
    let symbol = jit.lookup(0x1DE, &source, "sym_idem").unwrap();
    assert_eq!(call(&symbol), 5);
    assert_eq!(jit.commands_sent(), 0);
    assert_eq!(sandbox.commands().len(), 4);
    jit.finalize().unwrap();
}

#[test]
fn distinct_hashes_get_distinct_members() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();

    let hash = KernelIdentity::hash_of("scale", &["p=2"]);
    let name = KernelIdentity::symbol_for(hash);
    let derived = KernelIdentity::new(hash, c_kernel(&name, 2), name.clone());

    let one = jit.lookup(0x1, &c_kernel("sym_one", 1), "sym_one").unwrap();
    let two = jit.lookup_kernel(&derived).unwrap();
    assert_eq!((call(&one), call(&two)), (1, 2));
    assert!(!one.same_image(&two));

    let mut members = sandbox.archive_members();
    members.sort();
    let mut expected = vec!["k0000000000000001.co".to_string(), format!("{name}.co")];
    expected.sort();
    assert_eq!(members, expected);
    jit.finalize().unwrap();
}

#[test]
fn library_hit_ignores_broken_archive() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();
    jit.lookup(0xABC, &c_kernel("sym_ABC", 1), "sym_ABC").unwrap();
    jit.finalize().unwrap();

    std::fs::write(sandbox.archive(), b"garbage").unwrap();
    let before = sandbox.commands().len();

    let mut jit = Jit::single(sandbox.config()).unwrap();
    let symbol = jit.lookup(0xABC, &c_kernel("sym_ABC", 1), "sym_ABC").unwrap();
    assert_eq!(call(&symbol), 1);
    assert_eq!(sandbox.commands().len(), before);
    jit.finalize().unwrap();
}

#[test]
fn lone_archive_is_relinked() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();
    jit.lookup(0x7, &c_kernel("sym_seven", 7), "sym_seven").unwrap();
    jit.finalize().unwrap();

    std::fs::remove_file(sandbox.library()).unwrap();
    let mut jit = Jit::single(sandbox.config()).unwrap();
    let symbol = jit.lookup(0x7, &c_kernel("sym_seven", 7), "sym_seven").unwrap();
    assert_eq!(call(&symbol), 7);
    assert_eq!(jit.commands_sent(), 2);
    let mut commands = sandbox.commands();
    let install = commands.pop().unwrap_or_default();
    let link = commands.pop().unwrap_or_default();
    assert!(link.contains("-shared") && link.ends_with("-Wl,-rpath,."), "{link}");
    assert!(install.starts_with("install "), "{install}");
    assert!(sandbox.library().exists());
    assert!(!sandbox.path().join("libnxjit.so.relink").exists());
    jit.finalize().unwrap();
}

#[test]
fn truncated_library_is_relinked() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();
    jit.lookup(0x8, &c_kernel("sym_eight", 8), "sym_eight").unwrap();
    jit.finalize().unwrap();

    let installed = std::fs::read(sandbox.library()).unwrap();
    std::fs::write(sandbox.library(), &installed[..64]).unwrap();

    let mut jit = Jit::single(sandbox.config()).unwrap();
    let symbol = jit.lookup(0x8, &c_kernel("sym_eight", 8), "sym_eight").unwrap();
    assert_eq!(call(&symbol), 8);
    assert_eq!(jit.commands_sent(), 2);
    assert!(std::fs::read(sandbox.library()).unwrap().len() > 64);
    jit.finalize().unwrap();

    // The restored library serves the next run directly.
    let mut jit = Jit::single(sandbox.config()).unwrap();
    assert_eq!(call(&jit.lookup(0x8, &c_kernel("sym_eight", 8), "sym_eight").unwrap()), 8);
    assert_eq!(jit.commands_sent(), 0);
    jit.finalize().unwrap();
}

#[test]
fn failing_compiler_keeps_previous_library() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();
    jit.lookup(0xA, &c_kernel("sym_a", 10), "sym_a").unwrap();
    jit.finalize().unwrap();
    let installed = std::fs::read(sandbox.library()).unwrap();

    let mut config = sandbox.config();
    config.toolchain.cxx = "/nonexistent/bin/cc".to_string();
    let mut jit = Jit::single(config).unwrap();
    let err = jit.lookup(0xB, &c_kernel("sym_b", 11), "sym_b").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Build);
    assert!(matches!(err, JitError::Build { step: BuildStep::Compile, .. }), "{err}");
    assert_eq!(std::fs::read(sandbox.library()).unwrap(), installed);
    assert!(matches!(jit.lookup(0xA, &c_kernel("sym_a", 10), "sym_a"), Ok(_)));
    assert!(jit.finalize().is_err());
}

#[test]
fn finalize_leaves_no_worker() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let mut jit = Jit::single(sandbox.config()).unwrap();
    jit.lookup(0xF, &c_kernel("sym_f", 15), "sym_f").unwrap();
    let pid = jit.worker_pid().unwrap() as libc::pid_t;
    jit.finalize().unwrap();
    // SAFETY: signal 0 only probes for existence.
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    assert!(!alive);
}

#[test]
fn ranks_share_one_build() {
    if !toolchain_available() {
        return;
    }
    let sandbox = Sandbox::new();
    let handles: Vec<_> = LocalGroup::new(3)
        .into_iter()
        .map(|member| {
            let config = sandbox.config();
            thread::spawn(move || {
                let rank = member.rank();
                let mut jit = Jit::init(config, member).unwrap();
                assert_eq!(jit.worker_pid().is_some(), rank == 0);
                let symbol = jit.lookup(0x33, &c_kernel("sym_ranks", 33), "sym_ranks").unwrap();
                let value = call(&symbol);
                let sent = jit.commands_sent();
                jit.finalize().unwrap();
                (rank, value, sent)
            })
        })
        .collect();
    let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort();
    assert_eq!(results, vec![(0, 33, 4), (1, 33, 0), (2, 33, 0)]);
    assert_eq!(sandbox.commands().len(), 4);
}
