/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The bounded environment table (`SPEC_FULL.md` §5, "the env table is a
//! bounded array of slots with generation tags").

use crate::env::Env;
use exonucleus_abi::error::BadEnvSnafu;
use exonucleus_abi::{EnvId, KernelError, KernelResult};
use snafu::ensure;

struct Slot<AS> {
    generation: u32,
    env: Option<Env<AS>>,
}

/// Fixed-capacity table of `N` environment slots.
pub struct EnvTable<AS, const N: usize> {
    slots: [Slot<AS>; N],
}

impl<AS, const N: usize> EnvTable<AS, N> {
    pub fn new() -> Self {
        EnvTable {
            // Generation counters start at 1, not 0: an `EnvId` with
            // generation 0 is reserved for the `ENVID_SELF` sentinel, and
            // slot 0's first occupant must not collide with it.
            slots: core::array::from_fn(|_| Slot {
                generation: 1,
                env: None,
            }),
        }
    }
}

impl<AS, const N: usize> Default for EnvTable<AS, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<AS: Default, const N: usize> EnvTable<AS, N> {
    /// `SPEC_FULL.md` §4.C `exofork`: allocate a free slot as a child of
    /// `parent`. Fails with `NoFreeEnv` if every slot is occupied.
    pub fn alloc(&mut self, parent: EnvId) -> KernelResult<EnvId> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.env.is_none())
            .ok_or(KernelError::NoFreeEnv)?;
        let generation = self.slots[index].generation;
        let id = EnvId::new(index as u32, generation);
        self.slots[index].env = Some(Env::new(id, Some(parent)));
        Ok(id)
    }

    /// Allocate the first environment with no parent. Boot setup is out of
    /// scope (`SPEC_FULL.md` §1), but something has to seed env 0 before any
    /// `exofork` can run; this is that seed, used by the hosted harness and
    /// tests in place of the out-of-scope boot path.
    pub fn alloc_root(&mut self) -> KernelResult<EnvId> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.env.is_none())
            .ok_or(KernelError::NoFreeEnv)?;
        let generation = self.slots[index].generation;
        let id = EnvId::new(index as u32, generation);
        self.slots[index].env = Some(Env::new(id, None));
        Ok(id)
    }
}

impl<AS, const N: usize> EnvTable<AS, N> {
    /// `SPEC_FULL.md` §4.A capability resolution. `envid.is_self()` resolves
    /// to `caller`. `require_permission` enforces the self-or-parent rule;
    /// IPC send resolves with it `false`.
    pub fn resolve(
        &self,
        caller: EnvId,
        envid: EnvId,
        require_permission: bool,
    ) -> KernelResult<EnvId> {
        if envid.is_self() {
            return Ok(caller);
        }
        let env = self.get(envid)?;
        if require_permission {
            ensure!(env.may_be_mutated_by(caller), BadEnvSnafu { envid });
        }
        Ok(env.id)
    }

    pub fn get(&self, id: EnvId) -> KernelResult<&Env<AS>> {
        let slot = self
            .slots
            .get(id.index() as usize)
            .ok_or(KernelError::BadEnv { envid: id })?;
        match &slot.env {
            Some(env) if slot.generation == id.generation() => Ok(env),
            _ => Err(KernelError::BadEnv { envid: id }),
        }
    }

    pub fn get_mut(&mut self, id: EnvId) -> KernelResult<&mut Env<AS>> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .ok_or(KernelError::BadEnv { envid: id })?;
        match &mut slot.env {
            Some(env) if slot.generation == id.generation() => Ok(env),
            _ => Err(KernelError::BadEnv { envid: id }),
        }
    }

    /// `SPEC_FULL.md` §4.C `env_destroy`: tear down the slot and bump its
    /// generation so any handle still naming this `id` becomes stale.
    pub fn vacate(&mut self, id: EnvId) -> KernelResult<Env<AS>> {
        let index = id.index() as usize;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(KernelError::BadEnv { envid: id })?;
        if slot.generation != id.generation() || slot.env.is_none() {
            return Err(KernelError::BadEnv { envid: id });
        }
        let env = slot.env.take().expect("checked Some above");
        slot.generation = slot.generation.wrapping_add(1);
        Ok(env)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Env<AS>> {
        self.slots.iter().filter_map(|slot| slot.env.as_ref())
    }
}
