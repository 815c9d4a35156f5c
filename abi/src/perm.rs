/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! User-visible page permission bits.
//!
//! Mirrors the PTE flag layout an exokernel exposes to user space: the
//! hardware-meaningful `PRESENT`/`WRITE`/`USER` bits plus three bits the
//! hardware ignores and the user runtime is free to repurpose
//! (`SPEC_FULL.md` §3).

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Perm: u32 {
        /// Mapping is present. Required on every user-visible mapping.
        const PRESENT = 1 << 0;
        /// Mapping is user-mode accessible. Required on every user-visible mapping.
        const USER = 1 << 1;
        /// Mapping is hardware-writable.
        const WRITE = 1 << 2;
        /// User-defined: page is logically copy-on-write. The hardware write
        /// bit is never set alongside this one (`SPEC_FULL.md` §3 invariant).
        const AVAIL_COW = 1 << 3;
        /// User-defined: page should be propagated into a spawned child at
        /// the same address and permissions (`SPEC_FULL.md` §4.G step 5).
        const AVAIL_SHARE = 1 << 4;
        /// User-defined: reserved for user-runtime semantics not otherwise
        /// named by this specification.
        const AVAIL_3 = 1 << 5;
    }
}

impl Perm {
    /// Bits a caller is ever allowed to pass to a mapping syscall.
    pub const USER_SETTABLE: Perm = Perm::PRESENT
        .union(Perm::USER)
        .union(Perm::WRITE)
        .union(Perm::AVAIL_COW)
        .union(Perm::AVAIL_SHARE)
        .union(Perm::AVAIL_3);

    /// True iff this permission set is well-formed input to `page_alloc`,
    /// `page_map`, or the IPC page-transfer path: `PRESENT|USER` are set and
    /// no bit outside `USER_SETTABLE` is present (`SPEC_FULL.md` §4.B).
    pub fn is_valid_mapping_perm(self) -> bool {
        self.contains(Perm::PRESENT | Perm::USER) && Perm::USER_SETTABLE.contains(self)
    }

    /// True iff a mapping carrying this permission set may be treated as
    /// writable for the purposes of permission escalation checks: either the
    /// hardware bit is set, or the page is COW (about to become writable via
    /// the fault handler without further kernel involvement).
    pub fn is_writable_or_cow(self) -> bool {
        self.contains(Perm::WRITE) || self.contains(Perm::AVAIL_COW)
    }
}
