/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Rendezvous IPC state (`SPEC_FULL.md` §4.E).

use crate::envid::EnvId;
use crate::perm::Perm;

/// Per-environment IPC slot. A receiver blocked in `ipc_recv` has exactly
/// one of these live; a sender completes it atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpcState {
    /// True while this env is blocked waiting for a message.
    pub recving: bool,
    /// Destination VA the receiver asked a transferred page be mapped at,
    /// or `None` if it declined a page transfer.
    pub dstva: Option<usize>,
    /// Id of the environment that completed the most recent receive.
    pub from: Option<EnvId>,
    /// The single word delivered by the most recent receive.
    pub value: u32,
    /// Permissions of the transferred page, or empty if none was sent.
    pub perm: Perm,
}
