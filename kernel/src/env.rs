/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The environment: the kernel's unit of protection and scheduling
//! (`SPEC_FULL.md` §3).

use exonucleus_abi::{EnvId, EnvStatus, IpcState, Trapframe};

pub struct Env<AS> {
    pub id: EnvId,
    pub parent_id: Option<EnvId>,
    pub status: EnvStatus,
    pub address_space: AS,
    pub saved_registers: Trapframe,
    pub pgfault_upcall: Option<usize>,
    pub ipc_state: IpcState,
}

impl<AS: Default> Env<AS> {
    pub(crate) fn new(id: EnvId, parent_id: Option<EnvId>) -> Self {
        Env {
            id,
            parent_id,
            status: EnvStatus::NotRunnable,
            address_space: AS::default(),
            saved_registers: Trapframe::default(),
            pgfault_upcall: None,
            ipc_state: IpcState::default(),
        }
    }
}

impl<AS> Env<AS> {
    /// The capability rule of `SPEC_FULL.md` §4.A: `self` or `self`'s
    /// direct parent may mutate `self`'s state.
    pub fn may_be_mutated_by(&self, caller: EnvId) -> bool {
        self.id == caller || self.parent_id == Some(caller)
    }
}
