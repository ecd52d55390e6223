//! Sandbox construction and the capability-mode hand-off.

use std::convert::Infallible;
use std::ffi::OsString;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use libc::c_int;
use tracing::{debug, info, warn};

use crate::abi::{self, Architecture, LoaderKind, host_architecture};
use crate::env::{CuratedEnv, EnvCopyMode, EnvWhitelist};
use crate::error::SandboxError;
use crate::error_log::ErrorLog;
use crate::exec::{self, LaunchPlan, ProcessLauncher, SystemLauncher};
use crate::loaders::LoaderTable;
use crate::resources::{Inherited, ResourceTable, Target};
use crate::rights::Rights;

const SANDBOX_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::sandbox");

/// Pre-opened resources and curated environment for one target binary.
///
/// Construction steps never abort the sandbox. A failed step appends a
/// message to the error log and returns the error, leaving everything
/// acquired so far in place. The sandbox owns every descriptor it holds and
/// closes them all when released or dropped.
#[derive(Debug)]
pub struct Sandbox {
    resources: ResourceTable,
    environment: CuratedEnv,
    errors: ErrorLog,
    loaders: LoaderTable,
    host: Architecture,
}

impl Sandbox {
    /// Creates an empty sandbox using the platform's default loader paths.
    #[must_use]
    pub fn create() -> Self {
        Self::with_loaders(LoaderTable::default())
    }

    /// Creates an empty sandbox that selects loaders from `loaders`.
    #[must_use]
    pub fn with_loaders(loaders: LoaderTable) -> Self {
        Self {
            resources: ResourceTable::new(),
            environment: CuratedEnv::new(),
            errors: ErrorLog::new(),
            loaders,
            host: host_architecture(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_host(mut self, host: Architecture) -> Self {
        self.host = host;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_resources(mut self, resources: ResourceTable) -> Self {
        self.resources = resources;
        self
    }

    /// Every recorded failure, oldest first, and their count.
    #[must_use]
    pub fn errors(&self) -> (&[String], usize) {
        self.errors.all()
    }

    /// The most recent failure, or `None` when nothing has failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.errors.last()
    }

    /// The error log itself.
    #[must_use]
    pub const fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Descriptors acquired so far.
    #[must_use]
    pub const fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// The environment the target will receive.
    #[must_use]
    pub const fn environment(&self) -> &CuratedEnv {
        &self.environment
    }

    /// Returns true once a binary and its loader are both held.
    #[must_use]
    pub const fn has_target(&self) -> bool {
        self.resources.target().is_some()
    }

    /// Opens `path` with raw `open(2)` flags, limits it to `rights` and keeps
    /// it for the target to inherit.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Open`] or [`SandboxError::LimitRights`].
    pub fn add_file(
        &mut self,
        path: impl AsRef<Path>,
        flags: c_int,
        rights: Rights,
    ) -> Result<(), SandboxError> {
        let path = path.as_ref();
        let result = Inherited::open_file(path, flags, rights).map(|file| {
            debug!(target: SANDBOX_TARGET, path = %path.display(), ?rights, "file added");
            self.resources.push_file(file);
        });
        self.record(result)
    }

    /// Opens the directory at `path`, limits it to `rights` and appends it to
    /// the library search path.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Open`] or [`SandboxError::LimitRights`].
    pub fn add_path(
        &mut self,
        path: impl AsRef<Path>,
        flags: c_int,
        rights: Rights,
    ) -> Result<(), SandboxError> {
        let path = path.as_ref();
        let result = Inherited::open_directory(path, flags, rights).map(|dir| {
            debug!(
                target: SANDBOX_TARGET,
                path = %path.display(),
                position = self.resources.library_dirs().len(),
                "library directory added"
            );
            self.resources.push_library_dir(dir);
        });
        self.record(result)
    }

    /// Copies the caller's variables admitted by `whitelist` into the
    /// target's environment. Returns how many were copied.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidWhitelist`] when `whitelist` does not
    /// parse; nothing is copied in that case.
    pub fn copy_env(&mut self, whitelist: &str, mode: EnvCopyMode) -> Result<usize, SandboxError> {
        self.copy_env_from(std::env::vars_os(), whitelist, mode)
    }

    /// Like [`Sandbox::copy_env`], reading variables from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidWhitelist`] when `whitelist` does not
    /// parse.
    pub fn copy_env_from<I>(
        &mut self,
        source: I,
        whitelist: &str,
        mode: EnvCopyMode,
    ) -> Result<usize, SandboxError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let result = EnvWhitelist::parse(whitelist).map(|parsed| {
            let copied = self.environment.copy_from(source, &parsed, mode);
            debug!(target: SANDBOX_TARGET, whitelist, copied, "environment copied");
            copied
        });
        self.record(result)
    }

    /// Sets one variable in the target's environment, whatever the whitelist.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidVariable`] for names that are empty or
    /// contain `=`, and for NUL bytes anywhere.
    pub fn set_env(&mut self, name: &str, value: &str) -> Result<(), SandboxError> {
        let result = self.environment.set(name, value);
        self.record(result)
    }

    /// Takes a duplicate of `binary`, selects its loader and opens it.
    ///
    /// Either both descriptors are replaced or neither is: on failure the
    /// previously set pair, if any, is untouched.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::Duplicate`] when `binary` cannot be duplicated.
    /// - The header and ABI errors of [`abi::resolve`].
    /// - [`SandboxError::LoaderUnavailable`] when the loader cannot be opened.
    pub fn set_target(&mut self, binary: impl AsFd) -> Result<LoaderKind, SandboxError> {
        let result = self.resolve_target(binary.as_fd());
        self.record(result)
    }

    fn resolve_target(&mut self, binary: BorrowedFd<'_>) -> Result<LoaderKind, SandboxError> {
        let binary = Target::duplicate_binary(binary)?;
        let kind = abi::resolve(binary.as_fd(), self.host)?;
        let target = Target::open(binary, kind, self.loaders.path(kind))?;
        info!(
            target: SANDBOX_TARGET,
            loader = %target.loader_path().display(),
            kind = %kind,
            "target binary set"
        );
        self.resources.set_target(target);
        Ok(kind)
    }

    /// Enters capability mode and hands control to the loader.
    ///
    /// Never returns on success: the process image is replaced by the loader,
    /// which runs the target with `argv`.
    ///
    /// # Errors
    ///
    /// See [`Sandbox::exec_with`].
    pub fn exec<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<Infallible, SandboxError> {
        self.exec_with(argv, &SystemLauncher)
    }

    /// Like [`Sandbox::exec`], going through `launcher`.
    ///
    /// The launch plan is built and every inherited descriptor has its
    /// close-on-exec flag cleared before capability mode is entered. When
    /// entering capability mode fails the loader is never executed.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::NoTarget`] before a successful `set_target`.
    /// - [`SandboxError::InvalidArgument`] for an empty or NUL-bearing `argv`.
    /// - [`SandboxError::Inherit`] when descriptor flags cannot be updated.
    /// - [`SandboxError::CapabilityMode`] when capability mode is refused.
    /// - [`SandboxError::Exec`] when the loader cannot be executed.
    pub fn exec_with<S, L>(&mut self, argv: &[S], launcher: &L) -> Result<Infallible, SandboxError>
    where
        S: AsRef<str>,
        L: ProcessLauncher + ?Sized,
    {
        let result = self.launch(argv, launcher);
        self.record(result)
    }

    fn launch<S, L>(&self, argv: &[S], launcher: &L) -> Result<Infallible, SandboxError>
    where
        S: AsRef<str>,
        L: ProcessLauncher + ?Sized,
    {
        let plan = LaunchPlan::build(&self.resources, &self.environment, argv)?;
        exec::mark_inheritable(&self.resources)?;
        launcher
            .enter_capability_mode()
            .map_err(|source| SandboxError::CapabilityMode { source })?;
        info!(
            target: SANDBOX_TARGET,
            descriptors = self.resources.descriptor_count(),
            "capability mode entered; executing run-time loader"
        );
        launcher
            .execute(&self.resources, &plan)
            .map_err(|source| SandboxError::Exec { source })
    }

    /// Closes every owned descriptor and returns how many were closed.
    #[must_use = "the count reports how many descriptors were closed"]
    pub fn release(self) -> usize {
        if !self.errors.is_empty() {
            self.errors.dump();
        }
        let closed = self.resources.release();
        debug!(target: SANDBOX_TARGET, closed, "sandbox released");
        closed
    }

    fn record<T>(&mut self, result: Result<T, SandboxError>) -> Result<T, SandboxError> {
        if let Err(error) = &result {
            warn!(target: SANDBOX_TARGET, %error, "sandbox operation failed");
            self.errors.append(error.to_string());
        }
        result
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::create()
    }
}
