//! Descriptors owned by a sandbox.
//!
//! Every descriptor enters the table either by being opened here or by being
//! duplicated from a caller's handle, so closing the caller's copy never
//! affects the sandbox. All of them close when the table is dropped.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use libc::c_int;

use crate::abi::LoaderKind;
use crate::error::SandboxError;
use crate::rights::{self, Rights};

/// A rights-limited descriptor the target inherits.
#[derive(Debug)]
pub struct Inherited {
    path: PathBuf,
    fd: OwnedFd,
    rights: Rights,
}

impl Inherited {
    /// Opens `path` with raw `open(2)` flags and limits it to `rights`.
    ///
    /// The access mode is taken from `flags & O_ACCMODE`; the remaining bits
    /// are passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Open`] or [`SandboxError::LimitRights`].
    pub fn open_file(path: &Path, flags: c_int, rights: Rights) -> Result<Self, SandboxError> {
        let mut options = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => options.write(true),
            libc::O_RDWR => options.read(true).write(true),
            _ => options.read(true),
        };
        options.custom_flags(flags & !libc::O_ACCMODE);
        Self::open_with(path, &options, rights)
    }

    /// Opens the directory at `path` for lookups and limits it to `rights`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Open`] when `path` is missing or not a
    /// directory, or [`SandboxError::LimitRights`].
    pub fn open_directory(path: &Path, flags: c_int, rights: Rights) -> Result<Self, SandboxError> {
        let mut options = OpenOptions::new();
        options
            .read(true)
            .custom_flags((flags & !libc::O_ACCMODE) | libc::O_DIRECTORY);
        Self::open_with(path, &options, rights)
    }

    fn open_with(path: &Path, options: &OpenOptions, rights: Rights) -> Result<Self, SandboxError> {
        let file = options.open(path).map_err(|source| SandboxError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        rights::limit(file.as_fd(), &rights).map_err(|source| SandboxError::LimitRights {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            fd: OwnedFd::from(file),
            rights,
        })
    }

    /// Path the descriptor was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rights attached to the descriptor.
    #[must_use]
    pub const fn rights(&self) -> &Rights {
        &self.rights
    }
}

impl AsFd for Inherited {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// The binary and the loader chosen to run it, always held as a pair.
#[derive(Debug)]
pub struct Target {
    binary: OwnedFd,
    loader: OwnedFd,
    loader_kind: LoaderKind,
    loader_path: PathBuf,
}

impl Target {
    /// Duplicates `binary` so the caller's handle can be closed freely.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Duplicate`] when the descriptor cannot be
    /// duplicated.
    pub fn duplicate_binary(binary: BorrowedFd<'_>) -> Result<OwnedFd, SandboxError> {
        binary
            .try_clone_to_owned()
            .map_err(|source| SandboxError::Duplicate { source })
    }

    /// Opens the loader at `loader_path` read-only and pairs it with `binary`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::LoaderUnavailable`] when the loader cannot be
    /// opened.
    pub fn open(
        binary: OwnedFd,
        loader_kind: LoaderKind,
        loader_path: &Path,
    ) -> Result<Self, SandboxError> {
        let loader = File::open(loader_path).map_err(|source| SandboxError::LoaderUnavailable {
            path: loader_path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            binary,
            loader: OwnedFd::from(loader),
            loader_kind,
            loader_path: loader_path.to_path_buf(),
        })
    }

    /// Descriptor of the target binary.
    #[must_use]
    pub fn binary(&self) -> BorrowedFd<'_> {
        self.binary.as_fd()
    }

    /// Descriptor of the run-time loader.
    #[must_use]
    pub fn loader(&self) -> BorrowedFd<'_> {
        self.loader.as_fd()
    }

    /// Which loader-table entry was chosen.
    #[must_use]
    pub const fn loader_kind(&self) -> LoaderKind {
        self.loader_kind
    }

    /// Path the loader was opened from.
    #[must_use]
    pub fn loader_path(&self) -> &Path {
        &self.loader_path
    }
}

/// Exclusive owner of every descriptor acquired for one sandbox.
#[derive(Debug, Default)]
pub struct ResourceTable {
    target: Option<Target>,
    library_dirs: Vec<Inherited>,
    files: Vec<Inherited>,
}

impl ResourceTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target: None,
            library_dirs: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Replaces the binary/loader pair. The previous pair, if any, is closed.
    pub fn set_target(&mut self, target: Target) {
        self.target = Some(target);
    }

    /// Appends a library directory; call order is search order.
    pub fn push_library_dir(&mut self, dir: Inherited) {
        self.library_dirs.push(dir);
    }

    /// Appends a file for the target to inherit.
    pub fn push_file(&mut self, file: Inherited) {
        self.files.push(file);
    }

    /// The binary/loader pair, when set.
    #[must_use]
    pub const fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Library directories in search order.
    #[must_use]
    pub fn library_dirs(&self) -> &[Inherited] {
        &self.library_dirs
    }

    /// Inherited files in insertion order.
    #[must_use]
    pub fn files(&self) -> &[Inherited] {
        &self.files
    }

    /// Every descriptor the target must inherit across `exec`.
    pub fn inherited_fds(&self) -> impl Iterator<Item = BorrowedFd<'_>> {
        self.target
            .iter()
            .map(Target::binary)
            .chain(self.library_dirs.iter().map(AsFd::as_fd))
            .chain(self.files.iter().map(AsFd::as_fd))
    }

    /// Number of descriptors currently owned.
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        let pair = if self.target.is_some() { 2 } else { 0 };
        pair + self.library_dirs.len() + self.files.len()
    }

    /// Closes every owned descriptor and reports how many were closed.
    #[must_use = "the count reports how many descriptors were closed"]
    pub fn release(self) -> usize {
        let closed = self.descriptor_count();
        drop(self);
        closed
    }
}
