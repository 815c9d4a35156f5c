/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! User-level copy-on-write `fork` (`SPEC_FULL.md` §4.F): `duppage`,
//! exception-stack setup, upcall registration, and the COW page-fault
//! handler that runs the other side of the contract.
//!
//! There is no real second thread of control in a hosted simulation: a test
//! drives the "child" side by calling [`pgfault_handler`] itself after
//! switching the dispatcher's current env to the child (`DESIGN.md` records
//! this as the fork/thread split, matching the one already made for
//! `ipc_recv` in `exonucleus_abi::syscall`).

use exonucleus_abi::{
    page_round_down, EnvId, EnvStatus, Perm, Syscalls, UserMemory, UserTrapframe, ENVID_SELF,
    PAGE_SIZE, PFTEMP, UXSTACKTOP,
};

/// Placeholder user virtual address for the fault trampoline entry point.
/// A real binary's linker places `_pgfault_upcall` in its text segment,
/// already mapped by the loader; a hosted test that wants delivery to
/// succeed must map this address itself (`spawn` normally does this as part
/// of loading a program's text, `SPEC_FULL.md` §4.G).
pub const PGFAULT_UPCALL_ENTRY: usize = 0x00c0_0000;

/// Upper bound on the number of present user pages `fork` will walk in one
/// call. No-std, no allocator: the visited set is collected into a stack
/// array rather than a `Vec`. Generous for anything a hosted test exercises.
const MAX_FORK_MAPPINGS: usize = 1024;

/// Register the fault upcall and ensure the exception stack page exists.
/// Idempotent: re-registering simply replaces the prior mapping/upcall, so
/// `fork` can call this unconditionally instead of tracking "first fork in
/// this env" state the way the reference runtime's static flag does.
pub fn set_pgfault_handler<S: Syscalls>(sys: &mut S) {
    if sys.phy_page(ENVID_SELF, UXSTACKTOP - PAGE_SIZE).unwrap_or(None).is_none() {
        sys.page_alloc(
            ENVID_SELF,
            UXSTACKTOP - PAGE_SIZE,
            Perm::PRESENT | Perm::USER | Perm::WRITE,
        )
        .unwrap_or_else(|e| panic!("set_pgfault_handler: page_alloc exception stack: {e}"));
    }
    sys.env_set_pgfault_upcall(ENVID_SELF, PGFAULT_UPCALL_ENTRY)
        .unwrap_or_else(|e| panic!("set_pgfault_handler: env_set_pgfault_upcall: {e}"));
}

/// Snapshot every present page below `UTOP` in the calling env, skipping the
/// exception stack (`SPEC_FULL.md` §4.F step 4: "never shared").
fn collect_shareable_pages<S: Syscalls>(sys: &S) -> ([(usize, Perm); MAX_FORK_MAPPINGS], usize) {
    let mut pages = [(0usize, Perm::empty()); MAX_FORK_MAPPINGS];
    let mut count = 0;
    sys.for_each_user_page(&mut |va, perm| {
        if va == UXSTACKTOP - PAGE_SIZE {
            return;
        }
        if count < MAX_FORK_MAPPINGS {
            pages[count] = (va, perm);
            count += 1;
        }
    });
    (pages, count)
}

/// Map one present parent page into `child`, per `SPEC_FULL.md` §4.F step 4:
/// a writable or already-COW page becomes COW in both sides; a read-only
/// page stays read-only in the child.
fn duppage<S: Syscalls>(sys: &mut S, child: EnvId, va: usize, perm: Perm) {
    if perm.contains(Perm::WRITE) || perm.contains(Perm::AVAIL_COW) {
        let shared = Perm::PRESENT | Perm::USER | Perm::AVAIL_COW;
        sys.page_map(ENVID_SELF, va, child, va, shared)
            .unwrap_or_else(|e| panic!("duppage: map into child at {va:#x}: {e}"));
        // Strip the hardware write bit from the parent's own mapping too:
        // both sides must observe the page as read-only until the fault
        // handler privatizes it, or the parent could write without faulting.
        sys.page_map(ENVID_SELF, va, ENVID_SELF, va, shared)
            .unwrap_or_else(|e| panic!("duppage: remap parent at {va:#x}: {e}"));
    } else {
        sys.page_map(ENVID_SELF, va, child, va, Perm::PRESENT | Perm::USER)
            .unwrap_or_else(|e| panic!("duppage: map read-only into child at {va:#x}: {e}"));
    }
}

/// Parent-side `fork`: allocate a child, share every present user page under
/// copy-on-write semantics, give the child its own exception stack and fault
/// upcall, and make it runnable. Returns the child's id.
///
/// Every syscall here failing is a broken invariant, not a user error, so
/// failures panic rather than propagate (`SPEC_FULL.md` §7, §10.2).
pub fn fork<S: Syscalls + UserMemory>(sys: &mut S) -> EnvId {
    set_pgfault_handler(sys);

    let child = sys.exofork().unwrap_or_else(|e| panic!("fork: exofork: {e}"));

    let (pages, count) = collect_shareable_pages(sys);
    for &(va, perm) in &pages[..count] {
        duppage(sys, child, va, perm);
    }

    sys.page_alloc(
        child,
        UXSTACKTOP - PAGE_SIZE,
        Perm::PRESENT | Perm::USER | Perm::WRITE,
    )
    .unwrap_or_else(|e| panic!("fork: child exception stack: {e}"));
    sys.env_set_pgfault_upcall(child, PGFAULT_UPCALL_ENTRY)
        .unwrap_or_else(|e| panic!("fork: child upcall: {e}"));
    sys.env_set_status(child, EnvStatus::Runnable)
        .unwrap_or_else(|e| panic!("fork: child runnable: {e}"));

    log::info!("fork: child {child:?} runnable, {count} page(s) shared");
    child
}

/// The COW fault handler (`SPEC_FULL.md` §4.F): runs in the faulting env
/// after the kernel has delivered a `UserTrapframe` record onto its
/// exception stack. A fault that is not a COW write is a programming error
/// and panics rather than being silently ignored.
pub fn pgfault_handler<S: Syscalls + UserMemory>(sys: &mut S, utf: &UserTrapframe) {
    let fault_va = utf.fault_va as usize;
    let page_va = page_round_down(fault_va);
    let err = Perm::from_bits_truncate(utf.err);

    let (_, perm) = sys
        .phy_page(ENVID_SELF, page_va)
        .unwrap_or_else(|e| panic!("pgfault_handler: phy_page at {page_va:#x}: {e}"))
        .unwrap_or_else(|| panic!("pgfault_handler: no mapping at {page_va:#x}"));
    assert!(
        err.contains(Perm::WRITE) && perm.contains(Perm::AVAIL_COW),
        "pgfault_handler: fault at {fault_va:#x} (err {err:?}, perm {perm:?}) is not a COW write"
    );

    sys.page_alloc(ENVID_SELF, PFTEMP, Perm::PRESENT | Perm::USER | Perm::WRITE)
        .unwrap_or_else(|e| panic!("pgfault_handler: page_alloc PFTEMP: {e}"));

    let mut buf = [0u8; PAGE_SIZE];
    sys.read_mem(page_va, &mut buf)
        .unwrap_or_else(|e| panic!("pgfault_handler: read faulting page: {e}"));
    sys.write_mem(PFTEMP, &buf)
        .unwrap_or_else(|e| panic!("pgfault_handler: write PFTEMP: {e}"));

    sys.page_map(
        ENVID_SELF,
        PFTEMP,
        ENVID_SELF,
        page_va,
        Perm::PRESENT | Perm::USER | Perm::WRITE,
    )
    .unwrap_or_else(|e| panic!("pgfault_handler: map PFTEMP over {page_va:#x}: {e}"));
    sys.page_unmap(ENVID_SELF, PFTEMP)
        .unwrap_or_else(|e| panic!("pgfault_handler: unmap PFTEMP: {e}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use exonucleus_kernel::testkit::{HostAddressSpace, HostConsole, HostPhysicalMemory};
    use exonucleus_kernel::Kernel;

    type TestKernel = Kernel<HostAddressSpace, HostPhysicalMemory, HostConsole, 8>;

    fn new_kernel() -> TestKernel {
        Kernel::new(HostPhysicalMemory::new(), HostConsole::new())
    }

    /// Make the page at the installed upcall entry address present, as
    /// `spawn` would for a real program's text segment.
    fn map_upcall_entry(k: &mut TestKernel, env: EnvId) {
        k.page_alloc(env, PGFAULT_UPCALL_ENTRY, Perm::PRESENT | Perm::USER)
            .unwrap();
    }

    #[test]
    fn fork_shares_writable_pages_as_cow_in_both_directions() {
        let mut k = new_kernel();
        let parent = k.current();
        k.page_alloc(parent, 0x0040_0000, Perm::PRESENT | Perm::USER | Perm::WRITE)
            .unwrap();

        let child = fork(&mut k);
        map_upcall_entry(&mut k, parent);
        map_upcall_entry(&mut k, child);

        let (_, parent_perm) = k.phy_page(parent, 0x0040_0000).unwrap().unwrap();
        let (_, child_perm) = k.phy_page(child, 0x0040_0000).unwrap().unwrap();
        assert!(!parent_perm.contains(Perm::WRITE));
        assert!(parent_perm.contains(Perm::AVAIL_COW));
        assert!(!child_perm.contains(Perm::WRITE));
        assert!(child_perm.contains(Perm::AVAIL_COW));
    }

    #[test]
    fn fork_shares_readonly_pages_without_cow() {
        let mut k = new_kernel();
        let parent = k.current();
        k.page_alloc(parent, 0x0040_0000, Perm::PRESENT | Perm::USER)
            .unwrap();

        let child = fork(&mut k);
        let (_, child_perm) = k.phy_page(child, 0x0040_0000).unwrap().unwrap();
        assert!(!child_perm.contains(Perm::WRITE));
        assert!(!child_perm.contains(Perm::AVAIL_COW));
    }

    #[test]
    fn fork_gives_the_child_its_own_exception_stack() {
        let mut k = new_kernel();
        let parent = k.current();
        let child = fork(&mut k);

        let (parent_frame, _) = k.phy_page(parent, UXSTACKTOP - PAGE_SIZE).unwrap().unwrap();
        let (child_frame, _) = k.phy_page(child, UXSTACKTOP - PAGE_SIZE).unwrap().unwrap();
        assert_ne!(parent_frame, child_frame);
    }

    #[test]
    fn fork_makes_the_child_runnable() {
        let mut k = new_kernel();
        let child = fork(&mut k);
        assert_eq!(k.table().get(child).unwrap().status, EnvStatus::Runnable);
    }

    #[test]
    fn end_to_end_fork_and_write_scenario() {
        // Scenario 1: parent writes 0xAA, fork, child writes 0xBB, both
        // re-read their own distinct value.
        let mut k = new_kernel();
        let parent = k.current();
        k.page_alloc(parent, 0x0040_0000, Perm::PRESENT | Perm::USER | Perm::WRITE)
            .unwrap();
        k.write_mem(0x0040_0000, &[0xAA]).unwrap();

        let child = fork(&mut k);
        map_upcall_entry(&mut k, parent);
        map_upcall_entry(&mut k, child);

        // Child privatizes its page by faulting on a write.
        k.set_current(child);
        k.deliver_page_fault(child, 0x0040_0000, Perm::WRITE);
        let utf = k.read_upcall_record(child).unwrap();
        pgfault_handler(&mut k, &utf);
        k.write_mem(0x0040_0000, &[0xBB]).unwrap();

        // Parent privatizes its own page the same way.
        k.set_current(parent);
        k.deliver_page_fault(parent, 0x0040_0000, Perm::WRITE);
        let utf = k.read_upcall_record(parent).unwrap();
        pgfault_handler(&mut k, &utf);
        k.write_mem(0x0040_0000, &[0xAA]).unwrap();

        let mut parent_buf = [0u8; 1];
        k.set_current(parent);
        k.read_mem(0x0040_0000, &mut parent_buf).unwrap();
        assert_eq!(parent_buf, [0xAA]);

        let mut child_buf = [0u8; 1];
        k.set_current(child);
        k.read_mem(0x0040_0000, &mut child_buf).unwrap();
        assert_eq!(child_buf, [0xBB]);
    }
}
