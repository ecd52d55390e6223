//! Launch unmodified binaries inside a Capsicum capability-mode sandbox.
//!
//! A process in capability mode cannot open paths, so everything the target
//! needs has to be acquired beforehand. The `capstart` crate collects those
//! resources into a [`Sandbox`]: the binary itself, the run-time loader that
//! matches its ABI, the library directories the loader searches and any other
//! files the program should inherit, each limited to an explicit set of
//! [`Rights`]. The caller's environment is filtered through a whitelist.
//! [`Sandbox::exec`] then enters capability mode and replaces the process
//! with the loader, which runs the target from its descriptor.
//!
//! Construction never aborts. Every failed step is appended to an error log
//! that can be inspected afterwards, so a caller sees the whole chain of
//! failures rather than only the first.
//!
//! ```rust,no_run
//! use std::fs::File;
//!
//! use capstart::{EnvCopyMode, Rights, Sandbox};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sandbox = Sandbox::create();
//! sandbox.add_path("/lib", 0, Rights::library_directory())?;
//! sandbox.add_path("/usr/lib", 0, Rights::library_directory())?;
//! sandbox.copy_env("LANG,LC_*,TERM", EnvCopyMode::Overwrite)?;
//! sandbox.set_target(File::open("/usr/bin/wc")?)?;
//!
//! let err = match sandbox.exec(&["wc", "-l"]) {
//!     Ok(never) => match never {},
//!     Err(err) => err,
//! };
//! let (entries, count) = sandbox.errors();
//! eprintln!("{count} errors, last: {err}: {entries:?}");
//! # Ok(()) }
//! ```
//!
//! Rights are only enforced on FreeBSD. Elsewhere they are recorded but not
//! applied, and [`Sandbox::exec`] fails closed because capability mode
//! cannot be entered.

pub mod abi;
pub mod env;
mod error;
mod error_log;
pub mod exec;
mod loaders;
pub mod resources;
pub mod rights;
mod runtime;
mod sandbox;

#[cfg(test)]
mod tests;

pub use abi::{Architecture, ExecHeader, LoaderKind, ObjectKind, host_architecture};
pub use env::{CuratedEnv, EnvCopyMode, EnvWhitelist};
pub use error::SandboxError;
pub use error_log::ErrorLog;
pub use exec::{LaunchPlan, ProcessLauncher, SystemLauncher};
pub use loaders::{
    DEFAULT_COMPAT32_LOADER, DEFAULT_FOREIGN_LOADER, DEFAULT_NATIVE_LOADER, LoaderTable,
};
pub use resources::{Inherited, ResourceTable, Target};
pub use rights::{Right, Rights};
pub use sandbox::Sandbox;
