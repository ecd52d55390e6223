//! The terminal hand-off: capability mode, then the run-time loader.
//!
//! Paths cannot be resolved once capability mode is entered, so the loader is
//! executed from its descriptor and told where the binary and library
//! directories live by descriptor number, using the rtld direct-exec
//! conventions (`-f <fd>` and `LD_LIBRARY_PATH_FDS`).

use std::convert::Infallible;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd};

use crate::env::CuratedEnv;
use crate::error::SandboxError;
use crate::resources::ResourceTable;
use crate::runtime;

/// Variable rtld reads library-directory descriptors from.
pub const LIBRARY_PATH_FDS: &str = "LD_LIBRARY_PATH_FDS";

/// Arguments and environment the loader is executed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl LaunchPlan {
    /// Builds the loader invocation for the target in `resources`.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::NoTarget`] when no binary has been set.
    /// - [`SandboxError::InvalidArgument`] when `argv` is empty or an entry
    ///   contains a NUL byte.
    pub fn build<S: AsRef<str>>(
        resources: &ResourceTable,
        env: &CuratedEnv,
        argv: &[S],
    ) -> Result<Self, SandboxError> {
        let target = resources.target().ok_or(SandboxError::NoTarget)?;
        if argv.is_empty() {
            return Err(SandboxError::InvalidArgument { index: 0 });
        }

        let loader_path = target.loader_path();
        let loader_name = loader_path
            .file_name()
            .unwrap_or(loader_path.as_os_str())
            .to_string_lossy()
            .replace('\0', "");
        let binary_fd = target.binary().as_raw_fd().to_string();

        let mut loader_argv = Vec::with_capacity(argv.len() + 4);
        for fixed in [loader_name, String::from("-f"), binary_fd, String::from("--")] {
            loader_argv.extend(CString::new(fixed).ok());
        }
        for (index, arg) in argv.iter().enumerate() {
            let arg = CString::new(arg.as_ref())
                .map_err(|_| SandboxError::InvalidArgument { index })?;
            loader_argv.push(arg);
        }

        let reserved = format!("{LIBRARY_PATH_FDS}=");
        let mut envp: Vec<CString> = env
            .to_c_strings()
            .into_iter()
            .filter(|entry| !entry.as_bytes().starts_with(reserved.as_bytes()))
            .collect();
        if !resources.library_dirs().is_empty() {
            let fds: Vec<String> = resources
                .library_dirs()
                .iter()
                .map(|dir| dir.as_fd().as_raw_fd().to_string())
                .collect();
            let entry = format!("{LIBRARY_PATH_FDS}={}", fds.join(":"));
            // Descriptor numbers and the fixed name never contain NUL.
            if let Ok(entry) = CString::new(entry) {
                envp.push(entry);
            }
        }

        Ok(Self {
            argv: loader_argv,
            envp,
        })
    }

    /// Loader argument vector, starting with the loader's own name.
    #[must_use]
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// `NAME=value` environment entries.
    #[must_use]
    pub fn envp(&self) -> &[CString] {
        &self.envp
    }
}

/// Seam between the sandbox and the process-replacing system calls.
///
/// [`SystemLauncher`] is the production implementation; tests substitute a
/// double to observe the order of operations without replacing the test
/// process.
pub trait ProcessLauncher {
    /// Irrevocably restricts the process to already-held descriptors.
    ///
    /// # Errors
    ///
    /// Returns the OS error when capability mode cannot be entered.
    fn enter_capability_mode(&self) -> io::Result<()>;

    /// Replaces the process image with the loader held in `resources`.
    ///
    /// # Errors
    ///
    /// Only returns when the exec was refused.
    fn execute(&self, resources: &ResourceTable, plan: &LaunchPlan) -> io::Result<Infallible>;
}

/// Launcher backed by `cap_enter(2)` and `fexecve(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn enter_capability_mode(&self) -> io::Result<()> {
        runtime::enter_capability_mode()
    }

    fn execute(&self, resources: &ResourceTable, plan: &LaunchPlan) -> io::Result<Infallible> {
        let target = resources
            .target()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no run-time loader"))?;
        runtime::fexecve(target.loader(), plan.argv(), plan.envp())
    }
}

/// Lets every descriptor in `resources` survive the loader's `exec`.
///
/// # Errors
///
/// Returns [`SandboxError::Inherit`] when a descriptor's flags cannot be
/// updated.
pub fn mark_inheritable(resources: &ResourceTable) -> Result<(), SandboxError> {
    resources
        .inherited_fds()
        .try_for_each(runtime::clear_close_on_exec)
        .map_err(|source| SandboxError::Inherit { source })
}
