//! Duplicate-address detection sweep

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use uuid::Uuid;

use crate::models::{Allocation, AllocationState, ConflictRecord, Resolution, Subnet};

/// Group address-holding allocations by IP and record every group of two
/// or more claimants as a conflict.
///
/// Idempotent by content: a group that already has a pending record with
/// the same membership reuses that record instead of minting a duplicate,
/// so two scans with no intervening mutation return identical conflict
/// sets. Group members transition to `Conflicted`.
pub fn scan(
    allocations: &mut HashMap<Uuid, Allocation>,
    conflicts: &mut HashMap<Uuid, ConflictRecord>,
) -> Vec<ConflictRecord> {
    // BTreeMap keyed by address keeps the sweep order-independent.
    let mut by_ip: BTreeMap<Ipv4Addr, BTreeSet<Uuid>> = BTreeMap::new();
    for alloc in allocations.values() {
        if alloc.occupies_address() {
            by_ip.entry(alloc.ip).or_default().insert(alloc.id);
        }
    }

    let mut found = Vec::new();
    for (ip, members) in by_ip {
        if members.len() < 2 {
            continue;
        }

        let existing = conflicts
            .values()
            .find(|r| {
                r.resolution == Resolution::Pending
                    && r.ip == ip
                    && r.allocation_ids == members
            })
            .cloned();

        let record = match existing {
            Some(record) => record,
            None => {
                let record = ConflictRecord::new(ip, members.clone());
                tracing::warn!(
                    record_id = %record.id,
                    ip = %ip,
                    claimants = members.len(),
                    "Duplicate address detected"
                );
                conflicts.insert(record.id, record.clone());
                record
            }
        };

        for id in &members {
            if let Some(alloc) = allocations.get_mut(id) {
                if alloc.state == AllocationState::Active {
                    alloc.state = AllocationState::Conflicted;
                }
            }
        }

        found.push(record);
    }

    found
}

/// Find address-holding allocations whose address lies outside their own
/// subnet's range.
///
/// These enter through observed out-of-band reports; the allocator itself
/// never produces one. Allocations pointing at an unknown subnet count as
/// unauthorized too.
pub fn scan_unauthorized(
    subnets: &HashMap<Uuid, Subnet>,
    allocations: &HashMap<Uuid, Allocation>,
) -> Vec<Allocation> {
    let mut found: Vec<Allocation> = allocations
        .values()
        .filter(|a| a.occupies_address())
        .filter(|a| {
            subnets
                .get(&a.subnet_id)
                .map_or(true, |s| !s.contains(a.ip))
        })
        .cloned()
        .collect();
    found.sort_by_key(|a| (a.ip, a.id));
    found
}
