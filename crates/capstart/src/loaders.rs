//! Paths of the run-time loaders a sandbox can hand control to.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::abi::LoaderKind;

/// Default loader for Linux binaries under the Linuxulator.
pub const DEFAULT_FOREIGN_LOADER: &str = "/compat/linux/usr/lib/ld-linux.so.2";

/// Default loader for native binaries.
pub const DEFAULT_NATIVE_LOADER: &str = "/libexec/ld-elf.so.1";

/// Default loader for 32-bit binaries on a 64-bit host.
pub const DEFAULT_COMPAT32_LOADER: &str = "/libexec/ld-elf32.so.1";

/// Maps each [`LoaderKind`] to the loader binary on this system.
///
/// The table is platform configuration. Any field missing from a serialised
/// table falls back to its default.
///
/// ```
/// use capstart::{LoaderKind, LoaderTable};
///
/// let table: LoaderTable =
///     serde_json::from_str(r#"{ "native": "/opt/rtld/ld-elf.so.1" }"#).unwrap();
/// assert_eq!(table.path(LoaderKind::Native).to_str(), Some("/opt/rtld/ld-elf.so.1"));
/// assert_eq!(table.path(LoaderKind::Compat32).to_str(), Some("/libexec/ld-elf32.so.1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderTable {
    foreign: PathBuf,
    native: PathBuf,
    compat32: PathBuf,
}

impl LoaderTable {
    /// Path of the loader for `kind`.
    #[must_use]
    pub fn path(&self, kind: LoaderKind) -> &Path {
        match kind {
            LoaderKind::Foreign => &self.foreign,
            LoaderKind::Native => &self.native,
            LoaderKind::Compat32 => &self.compat32,
        }
    }

    /// Replaces the loader path for `kind`.
    #[must_use]
    pub fn with_path(mut self, kind: LoaderKind, path: impl Into<PathBuf>) -> Self {
        let slot = match kind {
            LoaderKind::Foreign => &mut self.foreign,
            LoaderKind::Native => &mut self.native,
            LoaderKind::Compat32 => &mut self.compat32,
        };
        *slot = path.into();
        self
    }
}

impl Default for LoaderTable {
    fn default() -> Self {
        Self {
            foreign: PathBuf::from(DEFAULT_FOREIGN_LOADER),
            native: PathBuf::from(DEFAULT_NATIVE_LOADER),
            compat32: PathBuf::from(DEFAULT_COMPAT32_LOADER),
        }
    }
}
