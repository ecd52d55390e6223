//! Curated environment handed to the sandboxed process.
//!
//! Nothing from the caller's environment reaches the target unless a
//! whitelist names it or it is set explicitly.

use std::collections::BTreeMap;
use std::ffi::{CString, OsString};

use crate::error::SandboxError;

/// How [`CuratedEnv::copy_from`] treats names that are already curated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvCopyMode {
    /// Copied values replace curated ones.
    #[default]
    Overwrite,
    /// Curated values win; only new names are copied.
    KeepExisting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(expected) => name == expected,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// Parsed list of variable names that may be copied into a sandbox.
///
/// Entries are separated by `,` or `:`. An entry ending in `*` matches every
/// name with that prefix, so `LC_*` admits `LC_ALL` and `LC_CTYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvWhitelist {
    patterns: Vec<Pattern>,
}

impl EnvWhitelist {
    /// Parses a whitelist such as `LANG,LC_*`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidWhitelist`] for empty entries and for
    /// `*` anywhere but the end of an entry.
    pub fn parse(list: &str) -> Result<Self, SandboxError> {
        let invalid = |reason| SandboxError::InvalidWhitelist {
            whitelist: list.to_owned(),
            reason,
        };
        if list.is_empty() {
            return Ok(Self {
                patterns: Vec::new(),
            });
        }

        let mut patterns = Vec::new();
        for entry in list.split([',', ':']).map(str::trim) {
            if entry.is_empty() {
                return Err(invalid("empty entry"));
            }
            let pattern = match entry.strip_suffix('*') {
                Some(prefix) if prefix.contains('*') => {
                    return Err(invalid("'*' is only allowed at the end of an entry"));
                }
                Some(prefix) => Pattern::Prefix(prefix.to_owned()),
                None if entry.contains('*') => {
                    return Err(invalid("'*' is only allowed at the end of an entry"));
                }
                None => Pattern::Exact(entry.to_owned()),
            };
            patterns.push(pattern);
        }
        Ok(Self { patterns })
    }

    /// Returns true when `name` is admitted.
    #[must_use]
    pub fn admits(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }
}

/// Ordered name/value pairs for the target's environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuratedEnv {
    vars: BTreeMap<String, String>,
}

impl CuratedEnv {
    /// Creates an empty environment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
        }
    }

    /// Copies the variables of `source` admitted by `whitelist`.
    ///
    /// Pairs that are not valid UTF-8 are skipped. Returns the number of
    /// variables written.
    pub fn copy_from<I>(&mut self, source: I, whitelist: &EnvWhitelist, mode: EnvCopyMode) -> usize
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut copied = 0;
        for (name, value) in source {
            let (Ok(name), Ok(value)) = (name.into_string(), value.into_string()) else {
                continue;
            };
            if !whitelist.admits(&name) || validate(&name, &value).is_err() {
                continue;
            }
            if mode == EnvCopyMode::KeepExisting && self.vars.contains_key(&name) {
                continue;
            }
            self.vars.insert(name, value);
            copied += 1;
        }
        copied
    }

    /// Sets `name` to `value`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidVariable`] when the pair cannot be
    /// passed to `execve(2)`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), SandboxError> {
        validate(name, value)?;
        self.vars.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    /// Value of `name`, if curated.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Iterates over the curated pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of curated variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true when nothing has been curated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Renders `NAME=value` strings for `execve(2)`.
    ///
    /// Entries were validated on insertion, so none contain NUL.
    pub(crate) fn to_c_strings(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(name, value)| CString::new(format!("{name}={value}")).ok())
            .collect()
    }
}

fn validate(name: &str, value: &str) -> Result<(), SandboxError> {
    let invalid = |reason| SandboxError::InvalidVariable {
        name: name.to_owned(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('=') {
        return Err(invalid("name contains '='"));
    }
    if name.contains('\0') || value.contains('\0') {
        return Err(invalid("contains a NUL byte"));
    }
    Ok(())
}
