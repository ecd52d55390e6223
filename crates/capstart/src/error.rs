//! Domain errors raised while constructing or launching a sandbox.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::abi::{Architecture, ObjectKind};

/// Errors raised while preparing or launching a sandboxed binary.
///
/// Every error returned by a [`Sandbox`](crate::Sandbox) operation has also
/// been appended, as text, to that sandbox's error log.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Duplicating a caller-supplied descriptor failed.
    #[error("failed to duplicate descriptor: {source}")]
    Duplicate {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The binary header could not be read from its descriptor.
    #[error("failed to read executable format: {source}")]
    ReadHeader {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The header bytes do not describe a well-formed ELF object.
    #[error("failed to read executable format: {reason}")]
    MalformedHeader {
        /// Parser diagnostic.
        reason: String,
    },

    /// The header carries an ELF format version this loader does not know.
    #[error("ELF format version mismatch: expected {expected}, found {found}")]
    FormatVersion {
        /// Version understood by the resolver.
        expected: u8,
        /// Version recorded in the header.
        found: u8,
    },

    /// The object is well formed but is not an executable.
    #[error("binary is not an executable ({kind})")]
    NotExecutable {
        /// Object kind recorded in the header.
        kind: ObjectKind,
    },

    /// A native binary targets neither the host nor its 32-bit relative.
    #[error(
        "binary is neither native nor a 32-bit-compatible relative of the \
         currently-running architecture ({host})"
    )]
    ArchitectureMismatch {
        /// Architecture of the running host.
        host: Architecture,
    },

    /// The header names an OS ABI without a known loader.
    #[error("unsupported OS ABI: {tag}")]
    UnsupportedOsAbi {
        /// Raw `EI_OSABI` byte.
        tag: u8,
    },

    /// The selected run-time loader could not be opened.
    #[error("failed to open run-time loader '{path}': {source}")]
    LoaderUnavailable {
        /// Loader path taken from the loader table.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A file or directory requested for the sandbox could not be opened.
    #[error("failed to open '{path}': {source}")]
    Open {
        /// Requested path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Attaching capability rights to a descriptor failed.
    #[error("failed to limit rights on '{path}': {source}")]
    LimitRights {
        /// Path the descriptor was opened from.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An environment whitelist could not be parsed.
    #[error("invalid environment whitelist {whitelist:?}: {reason}")]
    InvalidWhitelist {
        /// Whitelist as supplied.
        whitelist: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// An environment variable cannot be represented in the target environment.
    #[error("invalid environment variable {name:?}: {reason}")]
    InvalidVariable {
        /// Variable name as supplied.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// `exec` was requested before a target binary was set.
    #[error("no target binary has been set")]
    NoTarget,

    /// An argument vector entry contains an interior NUL byte.
    #[error("argument {index} contains an interior NUL byte")]
    InvalidArgument {
        /// Position in the argument vector.
        index: usize,
    },

    /// The process could not enter capability mode.
    #[error("failed to enter capability mode: {source}")]
    CapabilityMode {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An inherited descriptor could not be marked to survive `exec`.
    #[error("failed to mark descriptors for inheritance: {source}")]
    Inherit {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The run-time loader could not be executed.
    #[error("failed to execute run-time loader: {source}")]
    Exec {
        /// Underlying I/O error.
        source: io::Error,
    },
}
