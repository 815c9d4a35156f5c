/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Kernel error kinds and their mapping onto the negative-integer ABI
//! convention (`SPEC_FULL.md` §7, §10.2).

use crate::envid::EnvId;
use snafu::Snafu;

/// The five error kinds a syscall may return. Exactly these five and no
/// others, per `SPEC_FULL.md` §7.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum KernelError {
    #[snafu(display("bad env id {envid:?}: unknown slot or capability denied"))]
    BadEnv { envid: EnvId },

    #[snafu(display("invalid argument: {reason}"))]
    Inval { reason: InvalReason },

    #[snafu(display("out of physical memory or page-table space"))]
    NoMem,

    #[snafu(display("environment table is full"))]
    NoFreeEnv,

    #[snafu(display("target env {envid:?} is not blocked in ipc_recv"))]
    IpcNotRecv { envid: EnvId },
}

/// Sub-reason carried by `KernelError::Inval` so the message names the
/// specific violated precondition rather than a generic "bad argument".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalReason {
    /// `va` is `>= UTOP` or not page-aligned.
    BadVirtualAddress { va: usize },
    /// `perm` has a bit outside `PRESENT|USER|WRITE|AVAIL_*`, or is missing
    /// `PRESENT|USER`.
    BadPermissionBits { perm: u32 },
    /// A mapping syscall was asked to grant `WRITE` over a source mapping
    /// that is neither hardware-writable nor COW.
    WriteEscalation,
    /// No mapping exists at the address the syscall needs one at.
    NoSuchMapping { va: usize },
    /// A status value outside `{RUNNABLE, NOT_RUNNABLE}` was passed to
    /// `env_set_status` (`SPEC_FULL.md` §9 open question).
    BadEnvStatus,
}

impl core::fmt::Display for InvalReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InvalReason::BadVirtualAddress { va } => {
                write!(f, "virtual address {va:#x} is >= UTOP or misaligned")
            }
            InvalReason::BadPermissionBits { perm } => {
                write!(f, "permission bits {perm:#x} are malformed")
            }
            InvalReason::WriteEscalation => {
                write!(f, "requested WRITE over a non-writable, non-COW source")
            }
            InvalReason::NoSuchMapping { va } => write!(f, "no mapping at {va:#x}"),
            InvalReason::BadEnvStatus => {
                write!(f, "status must be RUNNABLE or NOT_RUNNABLE")
            }
        }
    }
}

/// Stable negative-integer codes surfaced in the syscall return register.
/// Dispatch performs this conversion at the trap boundary only; internal
/// code always passes the typed `KernelError` (`SPEC_FULL.md` §10.2).
impl KernelError {
    pub const fn code(self) -> i32 {
        match self {
            KernelError::BadEnv { .. } => -1,
            KernelError::Inval { .. } => -2,
            KernelError::NoMem => -3,
            KernelError::NoFreeEnv => -4,
            KernelError::IpcNotRecv { .. } => -5,
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
