//! Unit tests covering sandbox construction, failure recording and teardown.

use std::ffi::OsString;
use std::os::fd::OwnedFd;

use goblin::elf::header::{EM_386, EM_AARCH64, EM_X86_64, ET_REL};
use rstest::rstest;
use tempfile::TempDir;

use super::support::{
    ElfHeader, RecordingLauncher, amd64_sandbox, is_closed, lock_env, owned_raw_fds, write_binary,
};
use crate::abi::LoaderKind;
use crate::env::EnvCopyMode;
use crate::error::SandboxError;
use crate::rights::Rights;
use crate::sandbox::Sandbox;

fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
    pairs
        .iter()
        .map(|(name, value)| (OsString::from(name), OsString::from(value)))
        .collect()
}

#[test]
fn fresh_sandbox_has_no_errors_and_releases_nothing() {
    let sandbox = Sandbox::create();
    assert_eq!(sandbox.errors(), (&[][..], 0));
    assert_eq!(sandbox.last_error(), None);
    assert!(!sandbox.has_target());
    assert_eq!(sandbox.release(), 0);
}

#[rstest]
#[case::native(ElfHeader::native(EM_X86_64), LoaderKind::Native, "ld-elf.so.1")]
#[case::compat32(ElfHeader::native(EM_386).class32(), LoaderKind::Compat32, "ld-elf32.so.1")]
#[case::foreign(ElfHeader::foreign(EM_X86_64), LoaderKind::Foreign, "ld-linux.so.2")]
#[case::foreign_other_machine(ElfHeader::foreign(EM_AARCH64), LoaderKind::Foreign, "ld-linux.so.2")]
fn set_target_selects_loader(
    #[case] header: ElfHeader,
    #[case] expected: LoaderKind,
    #[case] loader_name: &str,
) {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());
    let (_binary_dir, binary) = write_binary(&header.to_bytes());

    let kind = sandbox.set_target(&binary).expect("target accepted");

    assert_eq!(kind, expected);
    let target = sandbox.resources().target().expect("target held");
    assert_eq!(target.loader_kind(), expected);
    assert_eq!(target.loader_path(), dir.path().join(loader_name));
    assert_eq!(sandbox.errors().1, 0);
}

#[test]
fn caller_may_close_binary_after_set_target() {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());
    let (_binary_dir, binary) = write_binary(&ElfHeader::native(EM_X86_64).to_bytes());

    sandbox.set_target(&binary).expect("target accepted");
    drop(binary);

    assert!(sandbox.has_target());
    assert_eq!(sandbox.release(), 2);
}

#[test]
fn rejected_binary_leaves_no_partial_target() {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());
    let (_binary_dir, object) =
        write_binary(&ElfHeader::native(EM_X86_64).object_type(ET_REL).to_bytes());

    let err = sandbox.set_target(&object).expect_err("relocatable object");

    assert!(matches!(err, SandboxError::NotExecutable { .. }), "{err:?}");
    assert!(!sandbox.has_target());
    assert_eq!(sandbox.errors().1, 1);
    assert_eq!(sandbox.last_error(), Some(err.to_string().as_str()));
    assert_eq!(sandbox.release(), 0);
}

#[test]
fn failed_set_target_keeps_previous_pair() {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());
    let (_native_dir, native) = write_binary(&ElfHeader::native(EM_X86_64).to_bytes());
    let (_arm_dir, mismatched) = write_binary(&ElfHeader::native(EM_AARCH64).to_bytes());

    sandbox.set_target(&native).expect("native accepted");
    let err = sandbox.set_target(&mismatched).expect_err("wrong architecture");

    assert!(matches!(err, SandboxError::ArchitectureMismatch { .. }), "{err:?}");
    let target = sandbox.resources().target().expect("previous target kept");
    assert_eq!(target.loader_kind(), LoaderKind::Native);
}

#[test]
fn missing_loader_is_recorded() {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = Sandbox::with_loaders(
        crate::loaders::LoaderTable::default()
            .with_path(LoaderKind::Foreign, dir.path().join("absent")),
    );
    let (_binary_dir, binary) = write_binary(&ElfHeader::foreign(EM_X86_64).to_bytes());

    let err = sandbox.set_target(&binary).expect_err("loader missing");

    assert!(matches!(err, SandboxError::LoaderUnavailable { .. }), "{err:?}");
    assert!(!sandbox.has_target());
}

#[test]
fn errors_accumulate_in_order() {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());

    sandbox
        .add_file(dir.path().join("missing"), libc::O_RDONLY, Rights::read_only())
        .expect_err("missing file");
    let (first, count) = sandbox.errors();
    let first = first.to_vec();
    assert_eq!(count, 1);

    sandbox.set_env("BAD=NAME", "value").expect_err("invalid name");
    sandbox.copy_env_from(vars(&[]), "A*B", EnvCopyMode::Overwrite).expect_err("bad whitelist");

    let (entries, count) = sandbox.errors();
    assert_eq!(count, 3);
    assert_eq!(entries.first(), first.first());
    assert!(sandbox.last_error().expect("last").contains("A*B"));
}

#[test]
fn failures_do_not_discard_earlier_resources() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("data.txt"), "payload").expect("write");
    let mut sandbox = amd64_sandbox(dir.path());

    sandbox
        .add_file(dir.path().join("data.txt"), libc::O_RDONLY, Rights::read_only())
        .expect("file added");
    sandbox.add_path(dir.path(), 0, Rights::library_directory()).expect("dir added");
    sandbox
        .add_path(dir.path().join("data.txt"), 0, Rights::library_directory())
        .expect_err("not a directory");

    assert_eq!(sandbox.resources().files().len(), 1);
    assert_eq!(sandbox.resources().library_dirs().len(), 1);
    assert_eq!(sandbox.errors().1, 1);
    assert_eq!(sandbox.release(), 2);
}

#[test]
fn release_closes_target_dirs_and_files() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("data.txt"), "payload").expect("write");
    let mut sandbox = amd64_sandbox(dir.path());
    let (_binary_dir, binary) = write_binary(&ElfHeader::native(EM_X86_64).to_bytes());

    sandbox.set_target(&binary).expect("target");
    sandbox.add_path(dir.path(), 0, Rights::library_directory()).expect("dir");
    sandbox
        .add_file(dir.path().join("data.txt"), libc::O_RDONLY, Rights::read_only())
        .expect("file");

    let fds = owned_raw_fds(sandbox.resources());
    assert_eq!(fds.len(), 4);

    assert_eq!(sandbox.release(), 4);
    for fd in fds {
        assert!(is_closed(fd), "descriptor {fd} leaked");
    }
}

#[rstest]
#[case::overwrite(EnvCopyMode::Overwrite, "copied")]
#[case::keep_existing(EnvCopyMode::KeepExisting, "explicit")]
fn explicit_variables_interact_with_copy_mode(
    #[case] mode: EnvCopyMode,
    #[case] expected: &str,
) {
    let mut sandbox = Sandbox::create();
    sandbox.set_env("LANG", "explicit").expect("set");

    let copied = sandbox
        .copy_env_from(vars(&[("LANG", "copied"), ("SECRET", "x")]), "LANG", mode)
        .expect("copy");

    assert_eq!(copied, usize::from(mode == EnvCopyMode::Overwrite));
    assert_eq!(sandbox.environment().get("LANG"), Some(expected));
    assert_eq!(sandbox.environment().get("SECRET"), None);
}

#[test]
fn copy_env_reads_the_callers_environment() {
    let _guard = lock_env();
    // SAFETY: the environment lock serialises every test touching variables.
    unsafe {
        std::env::set_var("CAPSTART_TEST_KEEP", "kept");
        std::env::set_var("CAPSTART_TEST_DROP", "dropped");
    }

    let mut sandbox = Sandbox::create();
    let copied = sandbox
        .copy_env("CAPSTART_TEST_KEEP", EnvCopyMode::Overwrite)
        .expect("copy");

    // SAFETY: as above.
    unsafe {
        std::env::remove_var("CAPSTART_TEST_KEEP");
        std::env::remove_var("CAPSTART_TEST_DROP");
    }
    assert_eq!(copied, 1);
    assert_eq!(sandbox.environment().get("CAPSTART_TEST_KEEP"), Some("kept"));
    assert_eq!(sandbox.environment().get("CAPSTART_TEST_DROP"), None);
}

#[test]
fn launch_without_target_is_recorded() {
    let mut sandbox = Sandbox::create();
    let launcher = RecordingLauncher::default();

    let err = sandbox.exec_with(&["tool"], &launcher).expect_err("no target");

    assert!(matches!(err, SandboxError::NoTarget), "{err:?}");
    assert!(!launcher.entered.get(), "capability mode entered without a target");
    assert_eq!(sandbox.errors().1, 1);
}

#[cfg(not(target_os = "freebsd"))]
#[test]
fn exec_fails_closed_without_capsicum() {
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());
    let (_binary_dir, binary) = write_binary(&ElfHeader::native(EM_X86_64).to_bytes());
    sandbox.set_target(&binary).expect("target");

    let err = sandbox.exec(&["tool"]).expect_err("capability mode unavailable");

    assert!(matches!(err, SandboxError::CapabilityMode { .. }), "{err:?}");
    assert!(sandbox.has_target());
}

#[test]
fn set_target_accepts_owned_descriptors() {
    let (_dir, binary) = write_binary(&ElfHeader::native(EM_X86_64).to_bytes());
    let dir = TempDir::new().expect("temp dir");
    let mut sandbox = amd64_sandbox(dir.path());
    let owned: OwnedFd = binary.try_clone().expect("clone").into();

    sandbox.set_target(owned).expect("owned descriptor accepted");
    assert!(sandbox.has_target());
}
