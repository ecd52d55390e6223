//! Shared fixtures for sandbox tests.

mod env;

use std::cell::Cell;
use std::convert::Infallible;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use goblin::elf::header::ET_EXEC;
use tempfile::TempDir;

pub(crate) use self::env::lock_env;
use crate::abi::{Architecture, ELFOSABI_FREEBSD, ELFOSABI_LINUX, EV_CURRENT, LoaderKind};
use crate::error::SandboxError;
use crate::exec::{LaunchPlan, ProcessLauncher};
use crate::loaders::LoaderTable;
use crate::resources::ResourceTable;
use crate::sandbox::Sandbox;

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// Builder for little-endian ELF headers.
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    class: u8,
    os_abi: u8,
    version: u8,
    object_type: u16,
    machine: u16,
}

impl ElfHeader {
    /// A 64-bit FreeBSD executable for `machine`.
    pub const fn native(machine: u16) -> Self {
        Self {
            class: ELFCLASS64,
            os_abi: ELFOSABI_FREEBSD,
            version: EV_CURRENT,
            object_type: ET_EXEC,
            machine,
        }
    }

    /// A 64-bit Linux executable for `machine`.
    pub const fn foreign(machine: u16) -> Self {
        Self {
            os_abi: ELFOSABI_LINUX,
            ..Self::native(machine)
        }
    }

    pub const fn class32(self) -> Self {
        Self {
            class: ELFCLASS32,
            ..self
        }
    }

    pub const fn object_type(self, object_type: u16) -> Self {
        Self {
            object_type,
            ..self
        }
    }

    pub const fn version(self, version: u8) -> Self {
        Self { version, ..self }
    }

    /// Serialises the header. 32-bit headers are 52 bytes, 64-bit ones 64.
    pub fn to_bytes(self) -> Vec<u8> {
        let wide = self.class == ELFCLASS64;
        let mut bytes = vec![0x7f, b'E', b'L', b'F', self.class, ELFDATA2LSB, self.version];
        bytes.push(self.os_abi);
        bytes.resize(16, 0);
        bytes.extend_from_slice(&self.object_type.to_le_bytes());
        bytes.extend_from_slice(&self.machine.to_le_bytes());
        bytes.extend_from_slice(&u32::from(self.version).to_le_bytes());
        // e_entry, e_phoff and e_shoff are word-sized.
        let word = if wide { 8 } else { 4 };
        bytes.resize(bytes.len() + 3 * word, 0);
        bytes.extend_from_slice(&0_u32.to_le_bytes());
        let (ehsize, phentsize, shentsize): (u16, u16, u16) =
            if wide { (64, 56, 64) } else { (52, 32, 40) };
        for field in [ehsize, phentsize, 0, shentsize, 0, 0] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes
    }
}

/// Whether `fd` no longer names an open descriptor in this process.
pub fn is_closed(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only reads flags and tolerates a closed descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    flags == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::EBADF)
}

/// Raw numbers of every descriptor `resources` owns, loader included.
pub fn owned_raw_fds(resources: &ResourceTable) -> Vec<RawFd> {
    use std::os::fd::AsRawFd;

    resources
        .inherited_fds()
        .map(|fd| fd.as_raw_fd())
        .chain(resources.target().map(|target| target.loader().as_raw_fd()))
        .collect()
}

/// Writes `contents` to a fresh file and returns it opened for reading.
pub fn write_binary(contents: &[u8]) -> (TempDir, File) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("target.bin");
    write_fixture(&path, contents);
    let file = File::open(&path).expect("open binary");
    (dir, file)
}

/// Creates a placeholder loader for each kind under `dir` and returns a table
/// pointing at them.
pub fn loader_table(dir: &Path) -> LoaderTable {
    [
        (LoaderKind::Foreign, "ld-linux.so.2"),
        (LoaderKind::Native, "ld-elf.so.1"),
        (LoaderKind::Compat32, "ld-elf32.so.1"),
    ]
    .into_iter()
    .fold(LoaderTable::default(), |table, (kind, name)| {
        let path = dir.join(name);
        write_fixture(&path, b"\x7fELF");
        table.with_path(kind, path)
    })
}

/// A sandbox whose loaders live under `dir`, pinned to an amd64 host.
pub fn amd64_sandbox(dir: &Path) -> Sandbox {
    Sandbox::with_loaders(loader_table(dir)).with_host(Architecture::Amd64)
}

fn write_fixture(path: &Path, contents: &[u8]) {
    let mut file = File::create(path)
        .unwrap_or_else(|error| panic!("failed to create fixture {path:?}: {error}"));
    file.write_all(contents)
        .unwrap_or_else(|error| panic!("failed to write fixture {path:?}: {error}"));
}

/// Launcher double that records calls instead of replacing the process.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    pub refuse_capability_mode: bool,
    pub entered: Cell<bool>,
    pub executed: Cell<bool>,
}

impl ProcessLauncher for RecordingLauncher {
    fn enter_capability_mode(&self) -> io::Result<()> {
        if self.refuse_capability_mode {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.entered.set(true);
        Ok(())
    }

    fn execute(&self, _resources: &ResourceTable, _plan: &LaunchPlan) -> io::Result<Infallible> {
        self.executed.set(true);
        Err(io::Error::from(io::ErrorKind::NotFound))
    }
}

/// Shared state for behavioural sandbox tests.
pub struct TestWorld {
    pub sandbox: Sandbox,
    pub launcher: RecordingLauncher,
    pub binary: Option<PathBuf>,
    pub selected: Option<Result<LoaderKind, SandboxError>>,
    pub launch_error: Option<SandboxError>,
    pub temp_dir: TempDir,
}

impl TestWorld {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to allocate temporary directory");
        Self {
            sandbox: amd64_sandbox(temp_dir.path()),
            launcher: RecordingLauncher::default(),
            binary: None,
            selected: None,
            launch_error: None,
            temp_dir,
        }
    }

    pub fn write_binary(&mut self, header: ElfHeader) {
        let path = self.temp_dir.path().join("target.bin");
        write_fixture(&path, &header.to_bytes());
        self.binary = Some(path);
    }

    pub fn set_target(&mut self) {
        let path = self.binary.as_ref().expect("binary not written");
        let file = File::open(path).expect("open binary");
        self.selected = Some(self.sandbox.set_target(&file));
    }

    pub fn launch(&mut self, argv: &[&str]) {
        match self.sandbox.exec_with(argv, &self.launcher) {
            Ok(never) => match never {},
            Err(error) => self.launch_error = Some(error),
        }
    }

    pub fn library_dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("create library directory");
        path
    }
}
