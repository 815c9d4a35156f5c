/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! `SPEC_FULL.md` §4.E, §8 scenarios 3-5: rendezvous IPC, with and without a
//! page transfer, and the not-recv retry loop.

use exonucleus_abi::{EnvId, KernelError, Perm, Syscalls, UserMemory};
use exonucleus_kernel::testkit::{HostAddressSpace, HostConsole, HostPhysicalMemory};
use exonucleus_kernel::Kernel;

type TestKernel = Kernel<HostAddressSpace, HostPhysicalMemory, HostConsole, 8>;

fn new_kernel() -> TestKernel {
    Kernel::new(HostPhysicalMemory::new(), HostConsole::new())
}

#[test]
fn ipc_value_only() {
    let mut k = new_kernel();
    let env_a = k.current();
    let env_b = k.spawn_root_env().unwrap();

    k.set_current(env_b);
    k.ipc_recv(None).unwrap();
    assert!(k.ipc_recv_result().is_none());

    k.set_current(env_a);
    let transferred = k.ipc_try_send(env_b, 42, None, Perm::empty()).unwrap();
    assert!(!transferred);

    k.set_current(env_b);
    let (value, from, perm) = k.ipc_recv_result().unwrap();
    assert_eq!(value, 42);
    assert_eq!(from, env_a);
    assert_eq!(perm, Perm::empty());
}

#[test]
fn ipc_with_page_transfer() {
    let mut k = new_kernel();
    let env_a = k.current();
    let env_b = k.spawn_root_env().unwrap();

    k.set_current(env_a);
    k.page_alloc(env_a, 0x0080_0000, Perm::PRESENT | Perm::USER | Perm::WRITE)
        .unwrap();
    k.write_mem(0x0080_0000, b"hi").unwrap();

    k.set_current(env_b);
    k.ipc_recv(Some(0x0090_0000)).unwrap();

    k.set_current(env_a);
    let transferred = k
        .ipc_try_send(
            env_b,
            7,
            Some(0x0080_0000),
            Perm::PRESENT | Perm::USER | Perm::WRITE,
        )
        .unwrap();
    assert!(transferred);

    k.set_current(env_b);
    let mut buf = [0u8; 2];
    k.read_mem(0x0090_0000, &mut buf).unwrap();
    assert_eq!(&buf, b"hi");
    let (value, from, perm) = k.ipc_recv_result().unwrap();
    assert_eq!(value, 7);
    assert_eq!(from, env_a);
    assert!(perm.contains(Perm::WRITE));
}

#[test]
fn ipc_send_before_recv_fails_then_retry_succeeds() {
    let mut k = new_kernel();
    let env_a = k.current();
    let env_b = k.spawn_root_env().unwrap();

    k.set_current(env_a);
    let err = k.ipc_try_send(env_b, 1, None, Perm::empty()).unwrap_err();
    assert_eq!(err, KernelError::IpcNotRecv { envid: env_b });

    k.set_current(env_b);
    k.ipc_recv(None).unwrap();

    k.set_current(env_a);
    // `yield` is a no-op state transition in this hosted harness (the
    // scheduler itself is out of scope); the retry succeeds once B is
    // actually blocked in `ipc_recv`.
    k.yield_now();
    let transferred = k.ipc_try_send(env_b, 1, None, Perm::empty()).unwrap();
    assert!(!transferred);
}

#[test]
fn failed_send_mutates_neither_side() {
    let mut k = new_kernel();
    let env_a = k.current();
    let env_b = k.spawn_root_env().unwrap();
    // B never calls ipc_recv.

    k.page_alloc(env_a, 0x0080_0000, Perm::PRESENT | Perm::USER)
        .unwrap();

    let err = k
        .ipc_try_send(env_b, 1, Some(0x0080_0000), Perm::PRESENT | Perm::USER)
        .unwrap_err();
    assert_eq!(err, KernelError::IpcNotRecv { envid: env_b });

    // A's mapping is untouched.
    assert!(k
        .phy_page(env_a, 0x0080_0000)
        .unwrap()
        .is_some());
    // B still shows no pending message.
    k.set_current(env_b);
    assert!(k.ipc_recv_result().is_none());
}

#[test]
fn write_escalation_over_readonly_source_is_rejected_before_any_transfer() {
    let mut k = new_kernel();
    let env_a = k.current();
    let env_b = k.spawn_root_env().unwrap();

    k.page_alloc(env_a, 0x0080_0000, Perm::PRESENT | Perm::USER)
        .unwrap();

    k.set_current(env_b);
    k.ipc_recv(Some(0x0090_0000)).unwrap();

    k.set_current(env_a);
    let err = k
        .ipc_try_send(
            env_b,
            1,
            Some(0x0080_0000),
            Perm::PRESENT | Perm::USER | Perm::WRITE,
        )
        .unwrap_err();
    assert_eq!(
        err,
        KernelError::Inval {
            reason: exonucleus_abi::InvalReason::WriteEscalation
        }
    );

    // Nothing was mapped into B.
    k.set_current(env_b);
    assert!(k.phy_page(EnvId::new(0, 0), 0x0090_0000).unwrap().is_none());
}

#[test]
fn receiver_declining_a_page_still_completes_the_send() {
    let mut k = new_kernel();
    let env_a = k.current();
    let env_b = k.spawn_root_env().unwrap();

    k.page_alloc(env_a, 0x0080_0000, Perm::PRESENT | Perm::USER | Perm::WRITE)
        .unwrap();

    k.set_current(env_b);
    k.ipc_recv(None).unwrap(); // declines a page (dstva >= UTOP sentinel)

    k.set_current(env_a);
    let transferred = k
        .ipc_try_send(
            env_b,
            5,
            Some(0x0080_0000),
            Perm::PRESENT | Perm::USER | Perm::WRITE,
        )
        .unwrap();
    assert!(!transferred);

    k.set_current(env_b);
    let (value, from, perm) = k.ipc_recv_result().unwrap();
    assert_eq!(value, 5);
    assert_eq!(from, env_a);
    assert_eq!(perm, Perm::empty());
}
