//! Host architecture detection and ELF machine mapping.

use std::fmt;

use goblin::elf::header::{
    EM_386, EM_AARCH64, EM_ARM, EM_PPC, EM_PPC64, EM_RISCV, EM_SPARCV9, EM_X86_64,
};

/// Instruction-set families the resolver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 64-bit x86.
    Amd64,
    /// 32-bit x86.
    I386,
    /// 32-bit ARM.
    Arm,
    /// 64-bit ARM.
    AArch64,
    /// 32-bit PowerPC.
    PowerPc,
    /// 64-bit PowerPC.
    PowerPc64,
    /// RISC-V.
    RiscV,
    /// 64-bit SPARC.
    Sparc64,
    /// MIPS; ABI variants are not distinguished, so no binary matches it.
    Mips,
    /// Any host this crate was not taught about.
    Unknown,
}

/// Architecture of the running host, fixed when the crate is compiled.
#[must_use]
pub const fn host_architecture() -> Architecture {
    if cfg!(target_arch = "x86_64") {
        Architecture::Amd64
    } else if cfg!(target_arch = "x86") {
        Architecture::I386
    } else if cfg!(target_arch = "aarch64") {
        Architecture::AArch64
    } else if cfg!(target_arch = "arm") {
        Architecture::Arm
    } else if cfg!(target_arch = "powerpc64") {
        Architecture::PowerPc64
    } else if cfg!(target_arch = "powerpc") {
        Architecture::PowerPc
    } else if cfg!(any(target_arch = "riscv64", target_arch = "riscv32")) {
        Architecture::RiscV
    } else if cfg!(target_arch = "sparc64") {
        Architecture::Sparc64
    } else if cfg!(any(target_arch = "mips", target_arch = "mips64")) {
        Architecture::Mips
    } else {
        Architecture::Unknown
    }
}

impl Architecture {
    /// ELF `e_machine` value for this architecture.
    ///
    /// `None` for families whose binaries cannot be identified from the
    /// machine field alone.
    #[must_use]
    pub const fn machine(self) -> Option<u16> {
        match self {
            Self::Amd64 => Some(EM_X86_64),
            Self::I386 => Some(EM_386),
            Self::Arm => Some(EM_ARM),
            Self::AArch64 => Some(EM_AARCH64),
            Self::PowerPc => Some(EM_PPC),
            Self::PowerPc64 => Some(EM_PPC64),
            Self::RiscV => Some(EM_RISCV),
            Self::Sparc64 => Some(EM_SPARCV9),
            Self::Mips | Self::Unknown => None,
        }
    }

    /// The 32-bit architecture this one can run under a compatibility loader.
    ///
    /// Only amd64 has a known relative; every other family reports none.
    #[must_use]
    pub const fn compat32_relative(self) -> Option<Self> {
        match self {
            Self::Amd64 => Some(Self::I386),
            _ => None,
        }
    }

    /// Returns true when a binary built for `machine` runs natively here.
    #[must_use]
    pub fn is_native(self, machine: u16) -> bool {
        self.machine() == Some(machine)
    }

    /// Returns true when `machine` is this architecture's 32-bit relative.
    #[must_use]
    pub fn is_compat32(self, machine: u16) -> bool {
        self.compat32_relative()
            .and_then(Self::machine)
            .is_some_and(|relative| relative == machine)
    }

    /// Operator-facing name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::I386 => "i386",
            Self::Arm => "arm",
            Self::AArch64 => "AArch64",
            Self::PowerPc => "powerpc",
            Self::PowerPc64 => "powerpc64",
            Self::RiscV => "risc-v",
            Self::Sparc64 => "sparc64",
            Self::Mips => "mips",
            Self::Unknown => "unknown architecture",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
