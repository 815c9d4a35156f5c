/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Virtual address constants and alignment helpers shared by the kernel and
//! user-space runtime.

/// Page size in bytes. Fixed at build time; see `SPEC_FULL.md` §10.3.
pub const PAGE_SIZE: usize = 4096;

/// Highest virtual address a user environment may ever map. The kernel
/// reserves everything at or above this line for itself.
pub const UTOP: usize = 0xeec0_0000;

/// Top of the single-page user exception stack.
pub const UXSTACKTOP: usize = UTOP;

/// Bottom of the normal user stack; `UTOP - PAGE_SIZE` is the exception
/// stack, the page below that is the regular stack top.
pub const USTACKTOP: usize = UTOP - PAGE_SIZE;

/// Scratch virtual address used by the COW fault handler to stage a private
/// copy of a faulting page before remapping it over the original address.
pub const PFTEMP: usize = UTOP - 2 * PAGE_SIZE;

/// Scratch virtual address `spawn` uses on the parent side to build the
/// child's initial stack page before handing it over.
pub const UTEMP: usize = UTOP - 3 * PAGE_SIZE;

/// True iff `va` is a valid user-mappable address: below `UTOP` and aligned
/// to a page boundary. Both conditions are required by every address-space
/// syscall (`SPEC_FULL.md` §4.B).
pub const fn is_valid_user_va(va: usize) -> bool {
    va < UTOP && va % PAGE_SIZE == 0
}

/// Round `va` down to the start of its containing page.
pub const fn page_round_down(va: usize) -> usize {
    va - (va % PAGE_SIZE)
}
