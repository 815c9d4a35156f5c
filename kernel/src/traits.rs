/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! External collaborator contracts the kernel consumes but does not
//! implement (`SPEC_FULL.md` §1, §6): the physical frame allocator, the
//! page-table walker, and the console sink/source. A real port supplies
//! these from its own MMU and allocator code; the `testkit` module supplies
//! host-backed stand-ins for tests.

use exonucleus_abi::{KernelError, Perm};

/// Physical memory, addressed by frame index. The kernel never touches raw
/// pointers into physical memory directly; every byte access goes through
/// this contract so tests can observe the actual contents of a frame
/// (`SPEC_FULL.md` §8 scenario 1).
pub trait PhysicalMemory {
    /// Allocate a fresh, zero-filled frame. `None` on exhaustion.
    fn alloc_frame(&mut self) -> Option<u32>;

    /// Drop a reference to `frame`; once the refcount reaches zero the frame
    /// becomes available to `alloc_frame` again.
    fn free_frame(&mut self, frame: u32);

    /// Current reference count of `frame`, counting mapping edges only.
    fn refcount(&self, frame: u32) -> u32;

    fn page(&self, frame: u32) -> &[u8];
    fn page_mut(&mut self, frame: u32) -> &mut [u8];
}

/// A single environment's page-table walker (`SPEC_FULL.md` §6, `map_*`
/// collaborator contracts). One instance per environment.
pub trait AddressSpace<PM: PhysicalMemory> {
    /// Insert `frame` at `va` with `perm`, bumping `frame`'s refcount and
    /// dropping the refcount of whatever was previously mapped at `va`, if
    /// anything. Fails with `NoMem` only if intermediate page-table storage
    /// could not be allocated.
    fn map_insert(
        &mut self,
        pm: &mut PM,
        frame: u32,
        va: usize,
        perm: Perm,
    ) -> Result<(), KernelError>;

    /// Look up the mapping at `va`, if any.
    fn map_lookup(&self, va: usize) -> Option<(u32, Perm)>;

    /// Remove the mapping at `va`, dropping the underlying frame's refcount.
    /// A no-op if nothing is mapped there.
    fn map_remove(&mut self, pm: &mut PM, va: usize);

    /// Visit every currently-present mapping as `(va, frame, perm)`. Used by
    /// `env_destroy` to drop every frame reference the env held
    /// (`SPEC_FULL.md` §4.C) — the only place the kernel walks a whole
    /// address space rather than a single `va`.
    fn for_each_mapped(&self, visit: &mut dyn FnMut(usize, u32, Perm));
}

/// The raw character sink/source behind `cputs`/`cgetc` (`SPEC_FULL.md`
/// §4.H). Out of scope to implement for real hardware; a test double
/// records what was written and/or feeds canned input.
pub trait Console {
    fn putc(&mut self, byte: u8);
    /// Non-blocking poll for one pending input character.
    fn poll(&mut self) -> Option<u8>;
}
