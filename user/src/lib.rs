/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

#![cfg_attr(not(test), no_std)]

//! User-space runtime built on the exonucleus syscall surface: copy-on-write
//! `fork` (`SPEC_FULL.md` §4.F) and ELF program `spawn` (`SPEC_FULL.md`
//! §4.G). Both are generic over any `Syscalls + UserMemory` implementation,
//! so they drive a real trap dispatcher or the hosted `testkit` the same
//! way.

pub mod fork;
pub mod spawn;

pub use fork::{fork, pgfault_handler, set_pgfault_handler, PGFAULT_UPCALL_ENTRY};
pub use spawn::{spawn, ProgramImage, SpawnError};
