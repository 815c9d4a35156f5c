/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The syscall surface itself (`SPEC_FULL.md` §6), expressed as a trait so
//! the user-space algorithms in the `user` crate are generic over whatever
//! concretely dispatches a trap.
//!
//! Two syscalls cannot be modeled as ordinary blocking Rust calls without a
//! real scheduler to suspend and resume a call stack: `yield` and
//! `ipc_recv`. Both are split into a state-transition half (the actual
//! kernel-side syscall handler, synchronous and total) and a result-polling
//! half that stands in for "the env was rescheduled and its saved registers
//! now carry the answer" (`SPEC_FULL.md` §9, "Suspension of ipc_recv").
//! `DESIGN.md` records this as a deliberate simplification.

use crate::envid::{EnvId, EnvStatus};
use crate::error::KernelResult;
use crate::perm::Perm;
use crate::trapframe::Trapframe;

/// Stable syscall numbers (`SPEC_FULL.md` §6). Not load-bearing for
/// dispatch in this simulation (the `Syscalls` trait is called directly,
/// there is no encoded trap gate) but kept as the canonical enumeration a
/// real trap dispatcher would switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    Cputs = 0,
    Cgetc = 1,
    GetEnvId = 2,
    EnvDestroy = 3,
    PageAlloc = 4,
    PageMap = 5,
    PageUnmap = 6,
    Exofork = 7,
    EnvSetStatus = 8,
    EnvSetTrapframe = 9,
    EnvSetPgfaultUpcall = 10,
    Yield = 11,
    PhyPage = 12,
    IpcTrySend = 13,
    IpcRecv = 14,
}

/// The 14-plus syscall surface an environment may invoke, resolved against
/// whatever environment this handle represents as "the current env"
/// (`SPEC_FULL.md` §3, "current environment" design note).
pub trait Syscalls {
    /// `SPEC_FULL.md` §4.C.
    fn getenvid(&self) -> EnvId;

    /// `SPEC_FULL.md` §4.C.
    fn env_destroy(&mut self, envid: EnvId) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.B.
    fn page_alloc(&mut self, envid: EnvId, va: usize, perm: Perm) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.B.
    fn page_map(
        &mut self,
        src_envid: EnvId,
        src_va: usize,
        dst_envid: EnvId,
        dst_va: usize,
        perm: Perm,
    ) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.B.
    fn page_unmap(&mut self, envid: EnvId, va: usize) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.B. Returns the frame index and permission bits at
    /// `va`, or `None` if nothing is mapped there.
    fn phy_page(&self, envid: EnvId, va: usize) -> KernelResult<Option<(u32, Perm)>>;

    /// `SPEC_FULL.md` §4.C.
    fn exofork(&mut self) -> KernelResult<EnvId>;

    /// `SPEC_FULL.md` §4.C.
    fn env_set_status(&mut self, envid: EnvId, status: EnvStatus) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.C.
    fn env_set_trapframe(&mut self, envid: EnvId, tf: Trapframe) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.D.
    fn env_set_pgfault_upcall(&mut self, envid: EnvId, upcall: usize) -> KernelResult<()>;

    /// `SPEC_FULL.md` §4.C, §5. Never returns a meaningful value to the
    /// caller; present for ABI completeness.
    fn yield_now(&mut self);

    /// `SPEC_FULL.md` §4.E. Returns whether a page was transferred.
    fn ipc_try_send(
        &mut self,
        envid: EnvId,
        value: u32,
        srcva: Option<usize>,
        perm: Perm,
    ) -> KernelResult<bool>;

    /// `SPEC_FULL.md` §4.E, state-transition half: validates `dstva`, marks
    /// this env as receiving, and suspends it. Does **not** return the
    /// delivered message — see `ipc_recv_result`.
    fn ipc_recv(&mut self, dstva: Option<usize>) -> KernelResult<()>;

    /// The part of the env descriptor page (`SPEC_FULL.md` §6) an IPC
    /// receiver polls after `ipc_recv` to learn whether a sender has
    /// completed its wait, and if so with what value/sender/permissions.
    fn ipc_recv_result(&self) -> Option<(u32, EnvId, Perm)>;

    /// `SPEC_FULL.md` §4.H.
    fn cputs(&mut self, bytes: &[u8]) -> KernelResult<usize>;

    /// `SPEC_FULL.md` §4.H.
    fn cgetc(&mut self) -> Option<u8>;

    /// Visit every present mapping below `UTOP` in the *current* env as
    /// `(va, perm)`. A real system gives user code this information through
    /// a self-mapped read-only page-table structure (the "UVPT" trick),
    /// needing no syscall at all; this trait exposes the same information
    /// directly since this ABI has no such self-mapping to read
    /// (`SPEC_FULL.md` §4.F step 4, `DESIGN.md` records the substitution).
    fn for_each_user_page(&self, visit: &mut dyn FnMut(usize, Perm));
}

/// Direct byte access to the *caller's own* mapped pages. Not part of the
/// syscall surface above — real user-mode code reads and writes its own
/// memory with ordinary CPU loads/stores once a mapping syscall has placed a
/// page, never through a trap. This trait exists only because the `user`
/// crate has no other way to touch bytes in a hosted simulation
/// (`SPEC_FULL.md` §6, consumed collaborators; `DESIGN.md` records the
/// split).
pub trait UserMemory {
    fn read_mem(&self, va: usize, buf: &mut [u8]) -> KernelResult<()>;
    fn write_mem(&mut self, va: usize, buf: &[u8]) -> KernelResult<()>;
}
