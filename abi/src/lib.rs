/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Wire types and the syscall trait shared between the kernel and the
//! user-space runtime: addresses, permission bits, env handles, trap
//! frames, IPC state, and error kinds.

#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod envid;
pub mod error;
pub mod ipc;
pub mod perm;
pub mod syscall;
pub mod trapframe;

pub use addr::{
    is_valid_user_va, page_round_down, PAGE_SIZE, PFTEMP, USTACKTOP, UTEMP, UTOP, UXSTACKTOP,
};
pub use envid::{EnvId, EnvStatus, ENVID_SELF};
pub use error::{InvalReason, KernelError, KernelResult};
pub use ipc::IpcState;
pub use perm::Perm;
pub use syscall::{Syscalls, SyscallNumber, UserMemory};
pub use trapframe::{
    GeneralRegisters, Trapframe, UserTrapframe, EFLAGS_IF, USER_CODE_SEGMENT, USER_DATA_SEGMENT,
};
