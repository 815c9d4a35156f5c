/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Page-fault upcall delivery (`SPEC_FULL.md` §4.D): builds the
//! `UserTrapframe` record and places it on the target environment's user
//! exception stack, then redirects its saved registers at the upcall entry
//! point. This is kernel-internal plumbing invoked by the trap entry path on
//! a user-mode page fault, not a syscall the env itself requests.

use crate::env::Env;
use crate::table::EnvTable;
use crate::traits::{AddressSpace, PhysicalMemory};
use exonucleus_abi::{Perm, UserTrapframe, PAGE_SIZE, UXSTACKTOP};

/// Why delivery could not complete; every reason is fatal to the faulting
/// env per `SPEC_FULL.md` §4.D step 1/4 and §9's "fault with no upcall".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallFailure {
    NoUpcallRegistered,
    ExceptionStackNotWritable,
    UpcallEntryNotReadable,
    ExceptionStackOverflow,
}

/// `size_of::<UserTrapframe>()` rounded the way the reference ABI pushes it:
/// as one opaque, word-aligned record. No padding assumptions beyond what
/// `#[repr(C)]` already guarantees are made by callers.
const RECORD_SIZE: usize = core::mem::size_of::<UserTrapframe>();

/// View a `Copy` `#[repr(C)]` value as its raw bytes, for writing a trap
/// record into simulated physical memory exactly as the real kernel would
/// memcpy it onto the user stack.
fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    // SAFETY: `T: Copy` and `#[repr(C)]` on every caller's type guarantee no
    // padding is read as uninitialized and no destructor runs on the alias.
    unsafe { core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>()) }
}

/// Write `bytes` starting at `va` in `env`'s address space, a page at a time.
/// Every page touched must already be present and writable; this is used
/// only for the kernel's own exception-stack record push, never for
/// general-purpose user memory access.
fn write_bytes<AS, PM>(
    env: &Env<AS>,
    pm: &mut PM,
    va: usize,
    bytes: &[u8],
) -> Result<(), UpcallFailure>
where
    AS: AddressSpace<PM>,
    PM: PhysicalMemory,
{
    let mut remaining = bytes;
    let mut addr = va;
    while !remaining.is_empty() {
        let page_va = addr - (addr % PAGE_SIZE);
        let offset = addr - page_va;
        let (frame, perm) = env
            .address_space
            .map_lookup(page_va)
            .filter(|(_, p)| p.contains(Perm::PRESENT | Perm::WRITE | Perm::USER))
            .ok_or(UpcallFailure::ExceptionStackNotWritable)?;
        let n = core::cmp::min(remaining.len(), PAGE_SIZE - offset);
        pm.page_mut(frame)[offset..offset + n].copy_from_slice(&remaining[..n]);
        remaining = &remaining[n..];
        addr += n;
    }
    Ok(())
}

/// `SPEC_FULL.md` §4.D in full: validate, build the record, choose a push
/// address (accounting for reentrant faults via the scratch word), check for
/// overflow, write the record, and redirect `envid`'s saved registers at the
/// upcall. On any failure the caller destroys `envid` (`SPEC_FULL.md` §9).
pub fn deliver<AS, PM, const N: usize>(
    table: &mut EnvTable<AS, N>,
    pm: &mut PM,
    envid: exonucleus_abi::EnvId,
    fault_va: usize,
    err: Perm,
) -> Result<(), UpcallFailure>
where
    AS: AddressSpace<PM> + Default,
    PM: PhysicalMemory,
{
    let env = table.get(envid).map_err(|_| UpcallFailure::NoUpcallRegistered)?;
    let upcall = env.pgfault_upcall.ok_or(UpcallFailure::NoUpcallRegistered)?;

    // Step 1: the scratch word at UXSTACKTOP-4 must already be writable
    // (the exception stack page is present), and the upcall entry point
    // must be readable.
    env.address_space
        .map_lookup(UXSTACKTOP - PAGE_SIZE)
        .filter(|(_, p)| p.contains(Perm::PRESENT | Perm::WRITE | Perm::USER))
        .ok_or(UpcallFailure::ExceptionStackNotWritable)?;
    let upcall_page = upcall - (upcall % PAGE_SIZE);
    env.address_space
        .map_lookup(upcall_page)
        .filter(|(_, p)| p.contains(Perm::PRESENT | Perm::USER))
        .ok_or(UpcallFailure::UpcallEntryNotReadable)?;

    let saved = env.saved_registers;
    let utf = UserTrapframe {
        regs: saved.regs,
        fault_va: fault_va as u32,
        err: err.bits(),
        eip: saved.eip,
        eflags: saved.eflags,
        esp: saved.esp,
    };

    // Step 3: are we already on the exception stack (a fault while handling
    // a previous fault)? If so, reserve the extra 4-byte scratch word the
    // user trampoline needs to stage its return.
    let already_on_uxstack = (saved.esp as usize) < UXSTACKTOP
        && (saved.esp as usize) >= UXSTACKTOP - PAGE_SIZE;
    let mut top = if already_on_uxstack {
        saved.esp as usize - 4
    } else {
        UXSTACKTOP
    };
    top -= RECORD_SIZE;

    // Step 4: exception-stack overflow check.
    if top < UXSTACKTOP - PAGE_SIZE {
        return Err(UpcallFailure::ExceptionStackOverflow);
    }

    write_bytes(env, pm, top, as_bytes(&utf)).map_err(|_| UpcallFailure::ExceptionStackNotWritable)?;

    let env = table
        .get_mut(envid)
        .map_err(|_| UpcallFailure::NoUpcallRegistered)?;
    env.saved_registers.eip = upcall as u32;
    env.saved_registers.esp = top as u32;
    Ok(())
}

/// Read a previously-pushed `UserTrapframe` back out of `env`'s exception
/// stack at `esp`. Used by tests and by the (otherwise out-of-scope)
/// trampoline-equivalent test harness to observe what was delivered.
pub fn read_record<AS, PM>(env: &Env<AS>, pm: &PM, esp: usize) -> UserTrapframe
where
    AS: AddressSpace<PM>,
    PM: PhysicalMemory,
{
    let mut utf = UserTrapframe::default();
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(&mut utf as *mut UserTrapframe as *mut u8, RECORD_SIZE)
    };
    let mut addr = esp;
    let mut offset = 0;
    while offset < RECORD_SIZE {
        let page_va = addr - (addr % PAGE_SIZE);
        let page_off = addr - page_va;
        let (frame, _) = env
            .address_space
            .map_lookup(page_va)
            .expect("exception stack page must be present to read back a pushed record");
        let n = core::cmp::min(RECORD_SIZE - offset, PAGE_SIZE - page_off);
        bytes[offset..offset + n].copy_from_slice(&pm.page(frame)[page_off..page_off + n]);
        offset += n;
        addr += n;
    }
    utf
}
