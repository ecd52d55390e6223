//! Binary introspection and run-time loader selection.
//!
//! The resolver reads only the fixed-size ELF header of the target: the object
//! type, the machine field and the OS-ABI tag. From those it decides which of
//! the three loaders in the [`LoaderTable`](crate::LoaderTable) can run the
//! binary, or why none can.

mod arch;

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::FileExt;

use goblin::elf::Elf;
use goblin::elf::header::{EI_OSABI, EI_VERSION, ET_CORE, ET_DYN, ET_EXEC, ET_REL};
use tracing::debug;

pub use self::arch::{Architecture, host_architecture};
use crate::error::SandboxError;

const ABI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::abi");

/// Largest ELF header (the 64-bit form).
pub const HEADER_LEN: usize = 64;

/// ELF format version every supported binary records in `EI_VERSION`.
pub const EV_CURRENT: u8 = 1;

/// `EI_OSABI` tag of Linux (GNU) binaries, run through the compat loader.
pub const ELFOSABI_LINUX: u8 = 3;

/// `EI_OSABI` tag of native FreeBSD binaries.
pub const ELFOSABI_FREEBSD: u8 = 9;

/// Object type recorded in an ELF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// `ET_REL`.
    Relocatable,
    /// `ET_EXEC`.
    Executable,
    /// `ET_DYN`.
    SharedObject,
    /// `ET_CORE`.
    Core,
    /// Any other `e_type` value.
    Other(u16),
}

impl From<u16> for ObjectKind {
    fn from(e_type: u16) -> Self {
        match e_type {
            ET_REL => Self::Relocatable,
            ET_EXEC => Self::Executable,
            ET_DYN => Self::SharedObject,
            ET_CORE => Self::Core,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relocatable => f.write_str("relocatable object"),
            Self::Executable => f.write_str("executable"),
            Self::SharedObject => f.write_str("shared object"),
            Self::Core => f.write_str("core file"),
            Self::Other(value) => write!(f, "object of unknown type {value:#x}"),
        }
    }
}

/// Which entry of the loader table runs a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    /// Loader for binaries built for a foreign OS ABI.
    Foreign,
    /// Loader for native binaries of the host architecture.
    Native,
    /// Loader for native binaries of the host's 32-bit relative.
    Compat32,
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreign => f.write_str("foreign"),
            Self::Native => f.write_str("native"),
            Self::Compat32 => f.write_str("compat32"),
        }
    }
}

/// The two header fields loader selection depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecHeader {
    /// ELF `e_machine`.
    pub machine: u16,
    /// ELF `e_ident[EI_OSABI]`.
    pub os_abi: u8,
}

/// Reads and validates the executable header behind `binary`.
///
/// The read is positional, so the descriptor's file offset is left where it
/// was and repeated calls see the same bytes.
///
/// # Errors
///
/// Returns [`SandboxError::ReadHeader`] when the descriptor cannot be read and
/// the errors of [`parse_exec_header`] otherwise.
pub fn read_exec_header(binary: BorrowedFd<'_>) -> Result<ExecHeader, SandboxError> {
    let file = binary
        .try_clone_to_owned()
        .map(File::from)
        .map_err(|source| SandboxError::ReadHeader { source })?;
    let mut bytes = [0_u8; HEADER_LEN];
    let filled = read_prefix(&file, &mut bytes).map_err(|source| SandboxError::ReadHeader { source })?;
    parse_exec_header(bytes.get(..filled).unwrap_or_default())
}

fn read_prefix(file: &File, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while let Some(rest) = buffer.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        match file.read_at(rest, filled as u64) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

/// Parses header bytes and checks that they describe an executable.
///
/// # Errors
///
/// - [`SandboxError::MalformedHeader`] when the bytes are not an ELF header.
/// - [`SandboxError::FormatVersion`] when `EI_VERSION` is not current.
/// - [`SandboxError::NotExecutable`] for relocatable objects, shared objects,
///   core files and unknown object types.
pub fn parse_exec_header(bytes: &[u8]) -> Result<ExecHeader, SandboxError> {
    let header = Elf::parse_header(bytes).map_err(|error| SandboxError::MalformedHeader {
        reason: error.to_string(),
    })?;

    let version = header.e_ident.get(EI_VERSION).copied().unwrap_or_default();
    if version != EV_CURRENT {
        return Err(SandboxError::FormatVersion {
            expected: EV_CURRENT,
            found: version,
        });
    }

    let kind = ObjectKind::from(header.e_type);
    if kind != ObjectKind::Executable {
        return Err(SandboxError::NotExecutable { kind });
    }

    Ok(ExecHeader {
        machine: header.e_machine,
        os_abi: header.e_ident.get(EI_OSABI).copied().unwrap_or_default(),
    })
}

/// Chooses the loader for `header` on a host of architecture `host`.
///
/// The OS-ABI tag is decided first: foreign binaries always take the foreign
/// loader, whatever their machine. Native binaries must match the host or its
/// 32-bit relative.
///
/// # Errors
///
/// - [`SandboxError::ArchitectureMismatch`] for native binaries of another
///   architecture.
/// - [`SandboxError::UnsupportedOsAbi`] for any other OS-ABI tag.
pub fn select_loader(header: ExecHeader, host: Architecture) -> Result<LoaderKind, SandboxError> {
    let kind = match header.os_abi {
        ELFOSABI_LINUX => LoaderKind::Foreign,
        ELFOSABI_FREEBSD if host.is_native(header.machine) => LoaderKind::Native,
        ELFOSABI_FREEBSD if host.is_compat32(header.machine) => LoaderKind::Compat32,
        ELFOSABI_FREEBSD => return Err(SandboxError::ArchitectureMismatch { host }),
        tag => return Err(SandboxError::UnsupportedOsAbi { tag }),
    };
    debug!(
        target: ABI_TARGET,
        machine = header.machine,
        os_abi = header.os_abi,
        %host,
        loader = %kind,
        "selected run-time loader"
    );
    Ok(kind)
}

/// Reads the header behind `binary` and selects its loader for `host`.
///
/// # Errors
///
/// Propagates the errors of [`read_exec_header`] and [`select_loader`].
pub fn resolve(binary: BorrowedFd<'_>, host: Architecture) -> Result<LoaderKind, SandboxError> {
    let header = read_exec_header(binary)?;
    select_loader(header, host)
}
