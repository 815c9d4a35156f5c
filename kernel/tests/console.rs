/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! `SPEC_FULL.md` §4.H: `cputs`/`cgetc` as a capability-free pass-through to
//! the out-of-scope console collaborator.

use exonucleus_abi::Syscalls;
use exonucleus_kernel::testkit::{HostAddressSpace, HostConsole, HostPhysicalMemory};
use exonucleus_kernel::Kernel;

type TestKernel = Kernel<HostAddressSpace, HostPhysicalMemory, HostConsole, 8>;

fn new_kernel() -> TestKernel {
    Kernel::new(HostPhysicalMemory::new(), HostConsole::new())
}

#[test]
fn cputs_writes_every_byte_to_the_console_and_reports_the_count() {
    let mut k = new_kernel();
    let n = k.cputs(b"hello").unwrap();
    assert_eq!(n, 5);
    assert_eq!(k.console().output(), b"hello");
}

#[test]
fn cgetc_polls_fed_input_without_blocking_then_reports_nothing_pending() {
    let mut console = HostConsole::new();
    console.feed_input(b"x");
    let mut k: TestKernel = Kernel::new(HostPhysicalMemory::new(), console);

    assert_eq!(k.cgetc(), Some(b'x'));
    assert_eq!(k.cgetc(), None);
}
