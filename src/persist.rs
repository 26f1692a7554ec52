//! State export and import
//!
//! The whole engine state serializes to one JSON document. The free-block
//! index is derived data and is not persisted: import rebuilds it from
//! the subnet table, which doubles as a consistency check on the loaded
//! document.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::allocator::FreeBlockIndex;
use crate::models::{AddressSpace, Allocation, ConflictRecord, Subnet};
use crate::service::manager::SpaceState;
use crate::service::{AddressManager, ManagerConfig};
use crate::{Error, Result};

/// One address space, flattened for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSpace {
    pub space: AddressSpace,
    pub subnets: Vec<Subnet>,
    pub allocations: Vec<Allocation>,
    pub conflicts: Vec<ConflictRecord>,
}

/// Full engine state document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub spaces: Vec<PersistedSpace>,
}

impl AddressManager {
    /// Snapshot every address space into a serializable document.
    pub fn export_state(&self) -> PersistedState {
        let mut spaces = Vec::new();
        for space in self.list_spaces() {
            let persisted = self.with_space_state(space.id, |state| {
                let mut subnets: Vec<Subnet> = state.subnets.values().cloned().collect();
                subnets.sort_by_key(|s| s.cidr);
                let mut allocations: Vec<Allocation> =
                    state.allocations.values().cloned().collect();
                allocations.sort_by_key(|a| (a.ip, a.assigned_at, a.id));
                let mut conflicts: Vec<ConflictRecord> =
                    state.conflicts.values().cloned().collect();
                conflicts.sort_by_key(|r| (r.detected_at, r.id));
                PersistedSpace {
                    space: state.record.clone(),
                    subnets,
                    allocations,
                    conflicts,
                }
            });
            if let Ok(persisted) = persisted {
                spaces.push(persisted);
            }
        }
        PersistedState { spaces }
    }

    /// Rebuild a manager from a persisted document.
    ///
    /// The free-block index is reconstructed by replaying every subnet
    /// reservation against a fresh index; any subnet that does not fit
    /// (out of range, misaligned, overlapping) fails the whole import.
    pub fn import_state(config: ManagerConfig, state: PersistedState) -> Result<Self> {
        let manager = AddressManager::with_config(config);

        for persisted in state.spaces {
            let space = persisted.space;
            if space.cidr.addr() != space.cidr.network() {
                return Err(Error::Persist(format!(
                    "address space {} has host bits set in {}",
                    space.id, space.cidr
                )));
            }

            let mut free = FreeBlockIndex::new(space.id, space.cidr);
            let mut subnets = HashMap::new();
            for subnet in persisted.subnets {
                if subnet.address_space_id != space.id {
                    return Err(Error::Persist(format!(
                        "subnet {} does not belong to space {}",
                        subnet.id, space.id
                    )));
                }
                free.reserve_exact(subnet.cidr).map_err(|err| {
                    Error::Persist(format!(
                        "subnet {} ({}) cannot be replayed: {err}",
                        subnet.id, subnet.cidr
                    ))
                })?;
                subnets.insert(subnet.id, subnet);
            }

            let mut allocations = HashMap::new();
            for alloc in persisted.allocations {
                if !subnets.contains_key(&alloc.subnet_id) {
                    return Err(Error::Persist(format!(
                        "allocation {} references unknown subnet {}",
                        alloc.id, alloc.subnet_id
                    )));
                }
                // Out-of-subnet addresses are legitimate (pending
                // remediation); out-of-space ones are corruption.
                if !space.cidr.contains(&alloc.ip) {
                    return Err(Error::Persist(format!(
                        "allocation {} address {} is outside address space {}",
                        alloc.id, alloc.ip, space.cidr
                    )));
                }
                allocations.insert(alloc.id, alloc);
            }

            let conflicts = persisted
                .conflicts
                .into_iter()
                .map(|r| (r.id, r))
                .collect();

            manager.insert_space(SpaceState {
                record: space,
                free,
                subnets,
                allocations,
                conflicts,
                version: 0,
            });
        }

        tracing::info!(
            spaces = manager.list_spaces().len(),
            "Imported engine state"
        );
        Ok(manager)
    }

    /// Write the current state to a JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.export_state();
        let json = serde_json::to_string_pretty(&state)?;
        fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), "Saved engine state");
        Ok(())
    }

    /// Load a manager from a JSON file; a missing file yields an empty
    /// manager so first runs need no setup step.
    pub fn load_from_file(config: ManagerConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(AddressManager::with_config(config));
        }
        let json = fs::read_to_string(path)?;
        let state: PersistedState = serde_json::from_str(&json)?;
        Self::import_state(config, state)
    }
}
