//! Capability rights attached to descriptors handed to a sandbox.
//!
//! A [`Rights`] value mirrors the layout of a version-0 Capsicum
//! `cap_rights_t`: two 64-bit words, each tagged with its index bit. Each
//! [`Right`] encodes the word it belongs to in bits 57-61, as `CAPRIGHT` does
//! in `<sys/capsicum.h>`.

use std::fmt;
use std::io;
use std::ops::BitOr;
use std::os::fd::BorrowedFd;

const INDEX_SHIFT: u32 = 57;
const INDEX_MASK: u64 = 0x1f << INDEX_SHIFT;
const VERSION_SHIFT: u32 = 62;
const RIGHTS_VERSION: u64 = 0;
const WORDS: usize = 2;

const fn capright(index: u32, bit: u64) -> u64 {
    (1_u64 << (INDEX_SHIFT + index)) | bit
}

/// A single Capsicum right, or a union of rights from the same word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Right(u64);

impl Right {
    /// `read(2)` and friends.
    pub const READ: Self = Self(capright(0, 0x1));
    /// `write(2)` and friends.
    pub const WRITE: Self = Self(capright(0, 0x2));
    /// `lseek(fd, 0, SEEK_CUR)`.
    pub const SEEK_TELL: Self = Self(capright(0, 0x4));
    /// Any `lseek(2)`.
    pub const SEEK: Self = Self(capright(0, 0x4 | 0x8));
    /// `pread(2)`.
    pub const PREAD: Self = Self(capright(0, 0x1 | 0x4 | 0x8));
    /// `pwrite(2)`.
    pub const PWRITE: Self = Self(capright(0, 0x2 | 0x4 | 0x8));
    /// `mmap(2)` without protection bits.
    pub const MMAP: Self = Self(capright(0, 0x10));
    /// `mmap(2)` with `PROT_READ`.
    pub const MMAP_R: Self = Self(capright(0, 0x10 | 0x1 | 0x4 | 0x8));
    /// `mmap(2)` with `PROT_EXEC`.
    pub const MMAP_X: Self = Self(capright(0, 0x10 | 0x20 | 0x4 | 0x8));
    /// `mmap(2)` with `PROT_READ | PROT_EXEC`.
    pub const MMAP_RX: Self = Self(capright(0, 0x10 | 0x1 | 0x20 | 0x4 | 0x8));
    /// `O_CREAT` through `openat(2)`.
    pub const CREATE: Self = Self(capright(0, 0x40));
    /// `fexecve(2)`.
    pub const FEXECVE: Self = Self(capright(0, 0x80));
    /// `fsync(2)`.
    pub const FSYNC: Self = Self(capright(0, 0x100));
    /// `ftruncate(2)`.
    pub const FTRUNCATE: Self = Self(capright(0, 0x200));
    /// Lookups relative to a directory descriptor.
    pub const LOOKUP: Self = Self(capright(0, 0x400));
    /// `fchdir(2)`.
    pub const FCHDIR: Self = Self(capright(0, 0x800));
    /// `fcntl(2)`.
    pub const FCNTL: Self = Self(capright(0, 0x8000));
    /// `fstat(2)`.
    pub const FSTAT: Self = Self(capright(0, 0x8_0000));
    /// `fstatat(2)`.
    pub const FSTATAT: Self = Self(capright(0, 0x8_0000 | 0x400));

    /// Raw `CAPRIGHT` encoding.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    const fn word(self) -> Option<usize> {
        match (self.0 & INDEX_MASK) >> INDEX_SHIFT {
            0b1 => Some(0),
            0b10 => Some(1),
            _ => None,
        }
    }
}

/// An opaque set of Capsicum rights.
///
/// The empty set permits nothing beyond holding the descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rights {
    words: [u64; WORDS],
}

impl Rights {
    /// The empty set.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            words: [
                (RIGHTS_VERSION << VERSION_SHIFT) | capright(0, 0),
                capright(1, 0),
            ],
        }
    }

    /// Rights for a read-only data file: read, seek, fstat and read mmap.
    #[must_use]
    pub fn read_only() -> Self {
        Self::none().with(Right::PREAD).with(Right::MMAP_R).with(Right::FSTAT)
    }

    /// Rights for a library directory the loader searches.
    #[must_use]
    pub fn library_directory() -> Self {
        Self::none()
            .with(Right::LOOKUP)
            .with(Right::FSTATAT)
            .with(Right::PREAD)
            .with(Right::MMAP_RX)
            .with(Right::FSTAT)
            .with(Right::FCNTL)
    }

    /// Adds `right` to the set.
    #[must_use]
    pub fn with(mut self, right: Right) -> Self {
        if let Some(word) = right.word().and_then(|index| self.words.get_mut(index)) {
            *word |= right.0;
        }
        self
    }

    /// Returns true when every bit of `right` is in the set.
    #[must_use]
    pub fn contains(&self, right: Right) -> bool {
        right
            .word()
            .and_then(|index| self.words.get(index))
            .is_some_and(|word| word & right.0 == right.0)
    }

    /// Raw `cr_rights` words, laid out as `cap_rights_t` expects.
    #[must_use]
    pub const fn words(&self) -> [u64; WORDS] {
        self.words
    }
}

impl Default for Rights {
    fn default() -> Self {
        Self::none()
    }
}

impl BitOr<Right> for Rights {
    type Output = Self;

    fn bitor(self, right: Right) -> Self {
        self.with(right)
    }
}

impl fmt::Debug for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [first, second] = self.words;
        write!(f, "Rights({first:#018x}, {second:#018x})")
    }
}

/// Restricts `fd` to `rights`.
///
/// On hosts without Capsicum the rights stay recorded on the sandbox only.
/// Such hosts cannot enter capability mode, so no descriptor reaches a target
/// without its limits being enforced.
///
/// # Errors
///
/// Returns the OS error reported by `cap_rights_limit(2)`.
pub fn limit(fd: BorrowedFd<'_>, rights: &Rights) -> io::Result<()> {
    crate::runtime::limit_rights(fd, rights)
}
