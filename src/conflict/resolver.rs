//! Conflict repair
//!
//! Repairs one record at a time: the policy winner keeps the disputed
//! address, every loser moves to a fresh address in its own subnet.
//! Repair is plan-then-apply — addresses for all losers are found before
//! anything mutates, so a failed repair leaves every record and
//! allocation exactly as it was.

use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::allocator::host;
use crate::models::{
    Allocation, AllocationState, ConflictRecord, Resolution, ResolutionOutcome,
    ResolutionPolicy, Subnet,
};
use crate::{Error, Result};

/// Repair a pending conflict record.
///
/// Fails with `ResolutionExhausted` when any loser's subnet has no free
/// address; the record then stays `Pending` for the next sweep.
pub fn resolve(
    policy: ResolutionPolicy,
    record_id: Uuid,
    subnets: &HashMap<Uuid, Subnet>,
    allocations: &mut HashMap<Uuid, Allocation>,
    conflicts: &mut HashMap<Uuid, ConflictRecord>,
) -> Result<ResolutionOutcome> {
    let record = conflicts
        .get(&record_id)
        .ok_or(Error::ConflictNotFound(record_id))?
        .clone();
    if record.resolution != Resolution::Pending {
        return Err(Error::InvalidRequest(format!(
            "conflict {record_id} is already closed"
        )));
    }

    // The live claimants still pointing at the disputed address. Members
    // released since detection simply drop out of the group.
    let mut claimants: Vec<Allocation> = record
        .allocation_ids
        .iter()
        .filter_map(|id| allocations.get(id))
        .filter(|a| a.occupies_address() && a.ip == record.ip)
        .cloned()
        .collect();
    claimants.sort_by_key(|a| (a.assigned_at, a.id));

    if claimants.len() < 2 {
        // The conflict evaporated out-of-band; close the record.
        let kept = claimants.first().map(|a| a.id);
        if let Some(id) = kept {
            if let Some(alloc) = allocations.get_mut(&id) {
                alloc.state = AllocationState::Active;
            }
        }
        if let Some(rec) = conflicts.get_mut(&record_id) {
            rec.resolution = Resolution::Reassigned;
        }
        return Ok(ResolutionOutcome {
            record_id,
            kept,
            reassigned: Vec::new(),
        });
    }

    let Some(winner) = policy.winner(&claimants) else {
        return Err(Error::InvalidRequest(format!(
            "conflict {record_id} has no claimants"
        )));
    };
    let winner_id = winner.id;

    // Plan: find a fresh address for every loser before mutating anything.
    let mut in_use_by_subnet: HashMap<Uuid, BTreeSet<u32>> = HashMap::new();
    let mut moves: Vec<(Uuid, std::net::Ipv4Addr)> = Vec::new();
    for loser in claimants.iter().filter(|a| a.id != winner_id) {
        let subnet = subnets
            .get(&loser.subnet_id)
            .ok_or(Error::SubnetNotFound(loser.subnet_id))?;
        let in_use = in_use_by_subnet
            .entry(loser.subnet_id)
            .or_insert_with(|| {
                allocations
                    .values()
                    .filter(|a| a.subnet_id == loser.subnet_id && a.occupies_address())
                    .map(|a| u32::from(a.ip))
                    .collect()
            });

        let new_ip = host::lowest_free(subnet.cidr, in_use)
            .ok_or(Error::ResolutionExhausted(record_id))?;
        in_use.insert(u32::from(new_ip));
        moves.push((loser.id, new_ip));
    }

    // Apply: all-or-nothing from here on.
    for (id, new_ip) in &moves {
        if let Some(alloc) = allocations.get_mut(id) {
            tracing::info!(
                allocation_id = %id,
                old_ip = %record.ip,
                new_ip = %new_ip,
                "Reassigned conflicting allocation"
            );
            alloc.ip = *new_ip;
            alloc.state = AllocationState::Resolved;
        }
    }
    if let Some(alloc) = allocations.get_mut(&winner_id) {
        alloc.state = AllocationState::Active;
    }
    if let Some(rec) = conflicts.get_mut(&record_id) {
        rec.resolution = Resolution::Reassigned;
    }

    Ok(ResolutionOutcome {
        record_id,
        kept: Some(winner_id),
        reassigned: moves,
    })
}

/// Dismiss a pending conflict without reassigning anyone.
///
/// Members flagged `Conflicted` return to `Active`; the record closes as
/// `Ignored`.
pub fn ignore(
    record_id: Uuid,
    allocations: &mut HashMap<Uuid, Allocation>,
    conflicts: &mut HashMap<Uuid, ConflictRecord>,
) -> Result<()> {
    let record = conflicts
        .get_mut(&record_id)
        .ok_or(Error::ConflictNotFound(record_id))?;
    if record.resolution != Resolution::Pending {
        return Err(Error::InvalidRequest(format!(
            "conflict {record_id} is already closed"
        )));
    }

    record.resolution = Resolution::Ignored;
    for id in record.allocation_ids.clone() {
        if let Some(alloc) = allocations.get_mut(&id) {
            if alloc.state == AllocationState::Conflicted {
                alloc.state = AllocationState::Active;
            }
        }
    }
    Ok(())
}
