/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Host-backed `AddressSpace`/`PhysicalMemory`/`Console` implementations
//! (`SPEC_FULL.md` §10.4): no MMU, no real page-table walker, just plain
//! `std` collections standing in for the out-of-scope external collaborators
//! named in `SPEC_FULL.md` §6. Exercised by this crate's own tests and
//! reused as a dev-dependency by the `user` crate's integration tests.

use crate::traits::{AddressSpace, Console, PhysicalMemory};
use exonucleus_abi::{KernelError, Perm, PAGE_SIZE};
use std::collections::{HashMap, VecDeque};
use std::vec::Vec;

struct Frame {
    bytes: [u8; PAGE_SIZE],
    refcount: u32,
}

/// A `PhysicalMemory` backed by a growable `Vec` of heap-allocated frames.
/// Frame indices are stable for the lifetime of the frame (never reused
/// while `refcount > 0`); freed slots are recycled by `alloc_frame`.
#[derive(Default)]
pub struct HostPhysicalMemory {
    frames: Vec<Option<Frame>>,
}

impl HostPhysicalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total frames ever handed out, free or not. Exposed so tests can
    /// assert on allocator exhaustion without a magic constant.
    pub fn capacity_used(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }
}

impl PhysicalMemory for HostPhysicalMemory {
    fn alloc_frame(&mut self) -> Option<u32> {
        if let Some(index) = self.frames.iter().position(|f| f.is_none()) {
            self.frames[index] = Some(Frame {
                bytes: [0u8; PAGE_SIZE],
                refcount: 0,
            });
            return Some(index as u32);
        }
        self.frames.push(Some(Frame {
            bytes: [0u8; PAGE_SIZE],
            refcount: 0,
        }));
        Some((self.frames.len() - 1) as u32)
    }

    fn free_frame(&mut self, frame: u32) {
        let slot = &mut self.frames[frame as usize];
        let empty = match slot {
            Some(f) => {
                f.refcount = f.refcount.saturating_sub(1);
                f.refcount == 0
            }
            None => return,
        };
        if empty {
            *slot = None;
        }
    }

    fn refcount(&self, frame: u32) -> u32 {
        self.frames
            .get(frame as usize)
            .and_then(|f| f.as_ref())
            .map(|f| f.refcount)
            .unwrap_or(0)
    }

    fn page(&self, frame: u32) -> &[u8] {
        &self.frames[frame as usize].as_ref().expect("live frame").bytes
    }

    fn page_mut(&mut self, frame: u32) -> &mut [u8] {
        &mut self.frames[frame as usize].as_mut().expect("live frame").bytes
    }
}

/// A bump the refcount of `frame` without inserting a mapping yet — used by
/// `map_insert` below, kept as a free function since `HostPhysicalMemory`'s
/// refcount bump on insert is a `testkit`-only bookkeeping detail, not part
/// of the `PhysicalMemory` contract itself (a real allocator bumps refcount
/// inside its own `map_insert`-equivalent primitive).
fn bump_refcount(pm: &mut HostPhysicalMemory, frame: u32) {
    if let Some(f) = pm.frames[frame as usize].as_mut() {
        f.refcount += 1;
    }
}

/// A per-env page table backed by a `HashMap<va, (frame, perm)>`. Page-table
/// allocation failure (`SPEC_FULL.md` §4.B `page_alloc`'s `NO_MEM` path) is
/// unreachable here — a `HashMap` never runs out of "page-table pages" the
/// way a real two-level table can — so `map_insert` never returns `NoMem`
/// itself; `page_alloc`'s own frame allocation is what can still fail.
#[derive(Default)]
pub struct HostAddressSpace {
    mappings: HashMap<usize, (u32, Perm)>,
}

impl HostAddressSpace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddressSpace<HostPhysicalMemory> for HostAddressSpace {
    fn map_insert(
        &mut self,
        pm: &mut HostPhysicalMemory,
        frame: u32,
        va: usize,
        perm: Perm,
    ) -> Result<(), KernelError> {
        // Bump the new mapping's refcount before dropping the old one: `va`
        // may already map `frame` itself (a permission-only remap), and
        // freeing first would zero out a frame this very call is about to
        // reference again.
        bump_refcount(pm, frame);
        if let Some((old_frame, _)) = self.mappings.remove(&va) {
            pm.free_frame(old_frame);
        }
        self.mappings.insert(va, (frame, perm));
        Ok(())
    }

    fn map_lookup(&self, va: usize) -> Option<(u32, Perm)> {
        self.mappings.get(&va).copied()
    }

    fn map_remove(&mut self, pm: &mut HostPhysicalMemory, va: usize) {
        if let Some((frame, _)) = self.mappings.remove(&va) {
            pm.free_frame(frame);
        }
    }

    fn for_each_mapped(&self, visit: &mut dyn FnMut(usize, u32, Perm)) {
        for (&va, &(frame, perm)) in self.mappings.iter() {
            visit(va, frame, perm);
        }
    }
}

/// A console that records everything written to it and replays canned input
/// bytes, for asserting on `cputs`/`cgetc` behavior in tests.
#[derive(Default)]
pub struct HostConsole {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl HostConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }
}

impl Console for HostConsole {
    fn putc(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn poll(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}
