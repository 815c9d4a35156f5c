/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! `SPEC_FULL.md` §4.A, §8 scenario 7: only an env itself or its direct
//! parent may mutate its address space or lifecycle state.

use exonucleus_abi::{EnvId, KernelError, Perm, Syscalls, ENVID_SELF};
use exonucleus_kernel::testkit::{HostAddressSpace, HostConsole, HostPhysicalMemory};
use exonucleus_kernel::Kernel;

type TestKernel = Kernel<HostAddressSpace, HostPhysicalMemory, HostConsole, 8>;

fn new_kernel() -> TestKernel {
    Kernel::new(HostPhysicalMemory::new(), HostConsole::new())
}

#[test]
fn unrelated_env_cannot_unmap_another_envs_page() {
    let mut k = new_kernel();
    let env_y = k.current();
    k.page_alloc(ENVID_SELF, 0x1000, Perm::PRESENT | Perm::USER)
        .unwrap();

    let env_x = k.spawn_root_env().unwrap();
    k.set_current(env_x);

    let err = k.page_unmap(env_y, 0x1000).unwrap_err();
    assert_eq!(err, KernelError::BadEnv { envid: env_y });

    // The mapping in Y is untouched.
    k.set_current(env_y);
    assert!(k.phy_page(ENVID_SELF, 0x1000).unwrap().is_some());
}

#[test]
fn unrelated_env_cannot_page_alloc_into_another_env() {
    let mut k = new_kernel();
    let env_y = k.current();
    let env_x = k.spawn_root_env().unwrap();
    k.set_current(env_x);

    let err = k
        .page_alloc(env_y, 0x2000, Perm::PRESENT | Perm::USER)
        .unwrap_err();
    assert_eq!(err, KernelError::BadEnv { envid: env_y });
}

#[test]
fn parent_may_mutate_child() {
    let mut k = new_kernel();
    let child = k.exofork().unwrap();
    // Still running as the parent: this must succeed.
    k.page_alloc(child, 0x3000, Perm::PRESENT | Perm::USER)
        .expect("parent may page_alloc into its own child");
}

#[test]
fn child_may_not_mutate_parent() {
    let mut k = new_kernel();
    let parent = k.current();
    let child = k.exofork().unwrap();
    k.set_current(child);
    let err = k
        .page_alloc(parent, 0x4000, Perm::PRESENT | Perm::USER)
        .unwrap_err();
    assert_eq!(err, KernelError::BadEnv { envid: parent });
}

#[test]
fn grandparent_may_not_mutate_grandchild() {
    let mut k = new_kernel();
    let root = k.current();
    let child = k.exofork().unwrap();
    k.set_current(child);
    let grandchild = k.exofork().unwrap();

    k.set_current(root);
    let err = k
        .page_alloc(grandchild, 0x5000, Perm::PRESENT | Perm::USER)
        .unwrap_err();
    assert_eq!(err, KernelError::BadEnv { envid: grandchild });
}

#[test]
fn bad_env_id_is_rejected() {
    let mut k = new_kernel();
    let bogus = EnvId::new(99, 1);
    let err = k
        .page_alloc(bogus, 0x1000, Perm::PRESENT | Perm::USER)
        .unwrap_err();
    assert_eq!(err, KernelError::BadEnv { envid: bogus });
}

#[test]
fn stale_generation_after_destroy_is_rejected() {
    let mut k = new_kernel();
    let child = k.exofork().unwrap();
    k.env_destroy(child).unwrap();
    let err = k
        .page_alloc(child, 0x1000, Perm::PRESENT | Perm::USER)
        .unwrap_err();
    assert_eq!(err, KernelError::BadEnv { envid: child });
}
