//! Address manager service
//!
//! Owns every address space by value behind one exclusive lock per space:
//! reserve/release/allocate_host calls against the same space linearize
//! through that lock, while different spaces never contend. There is no
//! ambient global registry; lookups go through the manager's own indexes.

use chrono::Utc;
use dashmap::DashMap;
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use uuid::Uuid;

use crate::allocator::{host, vlsm, FreeBlock, FreeBlockIndex};
use crate::conflict::{detector, resolver};
use crate::events::{AdvisoryEvent, AdvisoryPublisher};
use crate::models::{
    AddressSpace, Allocation, AllocationState, ConflictRecord, Resolution,
    ResolutionOutcome, ResolutionPolicy, Subnet, UtilizationSnapshot,
};
use crate::{Error, Result};

/// Configuration for the address manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Tie-break rule for conflict repair
    pub resolution_policy: ResolutionPolicy,
    /// Advisory broadcast buffer size
    pub advisory_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resolution_policy: ResolutionPolicy::default(),
            advisory_buffer: 256,
        }
    }
}

/// Everything one address space owns, guarded by a single lock
#[derive(Debug)]
pub(crate) struct SpaceState {
    pub(crate) record: AddressSpace,
    pub(crate) free: FreeBlockIndex,
    pub(crate) subnets: HashMap<Uuid, Subnet>,
    pub(crate) allocations: HashMap<Uuid, Allocation>,
    pub(crate) conflicts: HashMap<Uuid, ConflictRecord>,
    /// Bumped on every mutation; lets readers assert snapshot consistency
    pub(crate) version: u64,
}

/// Read-only summary of one address space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceReport {
    pub space: AddressSpace,
    pub free_addresses: u64,
    pub subnets: Vec<Subnet>,
    pub allocations: Vec<Allocation>,
    pub pending_conflicts: Vec<ConflictRecord>,
}

/// Core orchestration service for address space management
#[derive(Debug)]
pub struct AddressManager {
    config: ManagerConfig,
    /// Address spaces, each behind its own exclusive lock
    spaces: DashMap<Uuid, Arc<Mutex<SpaceState>>>,
    /// Subnet id -> owning space id
    subnet_index: DashMap<Uuid, Uuid>,
    /// Allocation id -> owning space id
    allocation_index: DashMap<Uuid, Uuid>,
    /// Latest utilization snapshot per subnet (external collector input)
    snapshots: DashMap<Uuid, UtilizationSnapshot>,
    advisories: AdvisoryPublisher,
}

impl AddressManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let advisories = AdvisoryPublisher::new(config.advisory_buffer);
        Self {
            config,
            spaces: DashMap::new(),
            subnet_index: DashMap::new(),
            allocation_index: DashMap::new(),
            snapshots: DashMap::new(),
            advisories,
        }
    }

    pub fn resolution_policy(&self) -> ResolutionPolicy {
        self.config.resolution_policy
    }

    /// Subscribe to advisory events.
    pub fn subscribe_advisories(&self) -> tokio::sync::broadcast::Receiver<AdvisoryEvent> {
        self.advisories.subscribe()
    }

    pub(crate) fn publish(&self, event: AdvisoryEvent) {
        self.advisories.publish(event);
    }

    fn space(&self, space_id: Uuid) -> Result<Arc<Mutex<SpaceState>>> {
        self.spaces
            .get(&space_id)
            .map(|s| s.clone())
            .ok_or(Error::AddressSpaceNotFound(space_id))
    }

    fn space_of_subnet(&self, subnet_id: Uuid) -> Result<Arc<Mutex<SpaceState>>> {
        let space_id = self
            .subnet_index
            .get(&subnet_id)
            .map(|e| *e)
            .ok_or(Error::SubnetNotFound(subnet_id))?;
        self.space(space_id)
    }

    // ==================== Address space lifecycle ====================

    /// Provision a new top-level address space.
    pub fn create_address_space(
        &self,
        name: impl Into<String>,
        cidr: Ipv4Net,
    ) -> Result<AddressSpace> {
        if cidr.addr() != cidr.network() {
            return Err(Error::InvalidRequest(format!(
                "{cidr} has host bits set; expected {}",
                cidr.trunc()
            )));
        }

        let record = AddressSpace::new(name, cidr);
        let state = SpaceState {
            free: FreeBlockIndex::new(record.id, cidr),
            record: record.clone(),
            subnets: HashMap::new(),
            allocations: HashMap::new(),
            conflicts: HashMap::new(),
            version: 0,
        };
        self.spaces.insert(record.id, Arc::new(Mutex::new(state)));

        tracing::info!(space_id = %record.id, cidr = %cidr, "Provisioned address space");
        Ok(record)
    }

    pub(crate) fn insert_space(&self, state: SpaceState) {
        let space_id = state.record.id;
        for subnet_id in state.subnets.keys() {
            self.subnet_index.insert(*subnet_id, space_id);
        }
        for allocation_id in state.allocations.keys() {
            self.allocation_index.insert(*allocation_id, space_id);
        }
        self.spaces.insert(space_id, Arc::new(Mutex::new(state)));
    }

    // ==================== Subnet carving ====================

    /// Carve the smallest subnet that fits the requested host count.
    pub fn allocate_subnet(
        &self,
        space_id: Uuid,
        requested_hosts: u32,
        tag: impl Into<String>,
    ) -> Result<Subnet> {
        let prefix_len = vlsm::prefix_for_hosts(requested_hosts)?;
        self.allocate_subnet_with_prefix(space_id, prefix_len, tag)
    }

    /// Carve a subnet of an exact prefix length.
    pub fn allocate_subnet_with_prefix(
        &self,
        space_id: Uuid,
        prefix_len: u8,
        tag: impl Into<String>,
    ) -> Result<Subnet> {
        let space = self.space(space_id)?;
        let mut state = space.lock();

        let cidr = state.free.reserve(prefix_len)?;
        let subnet = Subnet::new(space_id, cidr, tag);
        state.subnets.insert(subnet.id, subnet.clone());
        state.version += 1;
        self.subnet_index.insert(subnet.id, space_id);

        tracing::info!(
            space_id = %space_id,
            subnet_id = %subnet.id,
            cidr = %cidr,
            tag = %subnet.tag,
            "Carved subnet"
        );
        Ok(subnet)
    }

    /// Carve a same-size overflow sibling for a stressed subnet.
    ///
    /// The sibling records which subnet it extends, so repeat advisory
    /// sweeps recognize an existing extension even when tags collide.
    pub fn allocate_overflow(&self, subnet_id: Uuid) -> Result<Subnet> {
        let space = self.space_of_subnet(subnet_id)?;
        let mut state = space.lock();

        let source = state
            .subnets
            .get(&subnet_id)
            .ok_or(Error::SubnetNotFound(subnet_id))?
            .clone();
        let cidr = state.free.reserve(source.cidr.prefix_len())?;
        let mut subnet = Subnet::new(
            source.address_space_id,
            cidr,
            format!("{}-overflow", source.tag),
        );
        subnet.overflow_of = Some(source.id);
        state.subnets.insert(subnet.id, subnet.clone());
        state.version += 1;
        self.subnet_index.insert(subnet.id, source.address_space_id);

        tracing::info!(
            subnet_id = %source.id,
            overflow_subnet_id = %subnet.id,
            cidr = %cidr,
            "Carved overflow sibling"
        );
        Ok(subnet)
    }

    /// Return an empty subnet's block to the free pool.
    pub fn release_subnet(&self, subnet_id: Uuid) -> Result<()> {
        let space = self.space_of_subnet(subnet_id)?;
        let mut state = space.lock();

        let subnet = state
            .subnets
            .get(&subnet_id)
            .ok_or(Error::SubnetNotFound(subnet_id))?
            .clone();

        let live = state
            .allocations
            .values()
            .filter(|a| a.subnet_id == subnet_id && a.occupies_address())
            .count();
        if live > 0 {
            return Err(Error::SubnetNotEmpty(subnet_id, live));
        }

        state.free.release(subnet.cidr)?;
        state.subnets.remove(&subnet_id);
        // Drop the released allocation history along with the subnet.
        let stale: Vec<Uuid> = state
            .allocations
            .values()
            .filter(|a| a.subnet_id == subnet_id)
            .map(|a| a.id)
            .collect();
        for id in stale {
            state.allocations.remove(&id);
            self.allocation_index.remove(&id);
        }
        state.version += 1;
        self.subnet_index.remove(&subnet_id);
        self.snapshots.remove(&subnet_id);

        tracing::info!(subnet_id = %subnet_id, cidr = %subnet.cidr, "Released subnet");
        Ok(())
    }

    // ==================== Host assignment ====================

    /// Assign an address in a subnet to a device.
    ///
    /// With no preferred address the lowest unused usable address wins;
    /// a preferred address must be in range, not network/broadcast, and
    /// not already held, otherwise `AddressInUse`.
    pub fn allocate_host(
        &self,
        subnet_id: Uuid,
        preferred_ip: Option<Ipv4Addr>,
        assigned_to: impl Into<String>,
    ) -> Result<Allocation> {
        let space = self.space_of_subnet(subnet_id)?;
        let mut state = space.lock();

        let subnet = state
            .subnets
            .get(&subnet_id)
            .ok_or(Error::SubnetNotFound(subnet_id))?
            .clone();

        let in_use: BTreeSet<u32> = state
            .allocations
            .values()
            .filter(|a| a.subnet_id == subnet_id && a.occupies_address())
            .map(|a| u32::from(a.ip))
            .collect();

        let ip = match preferred_ip {
            Some(ip) => {
                if !subnet.contains(ip) || !host::is_usable(subnet.cidr, ip) {
                    return Err(Error::InvalidRequest(format!(
                        "{ip} is not a usable address in {}",
                        subnet.cidr
                    )));
                }
                if in_use.contains(&u32::from(ip)) {
                    return Err(Error::AddressInUse(ip));
                }
                ip
            }
            None => host::lowest_free(subnet.cidr, &in_use)
                .ok_or(Error::HostsExhausted(subnet_id))?,
        };

        let allocation = Allocation::new(subnet_id, ip, assigned_to);
        self.allocation_index
            .insert(allocation.id, subnet.address_space_id);
        state.allocations.insert(allocation.id, allocation.clone());
        state.version += 1;

        tracing::info!(
            subnet_id = %subnet_id,
            allocation_id = %allocation.id,
            ip = %ip,
            device = %allocation.assigned_to,
            "Assigned host address"
        );
        Ok(allocation)
    }

    /// Record an externally reported device assignment.
    ///
    /// Out-of-band writes bypass the allocator's in-use check by nature,
    /// which is exactly how duplicate addresses enter the table; the
    /// detector sweep finds them later. The address must lie inside the
    /// owning space but may fall outside the subnet — such reports are
    /// what the unauthorized sweep picks up.
    pub fn register_observed(
        &self,
        subnet_id: Uuid,
        ip: Ipv4Addr,
        assigned_to: impl Into<String>,
    ) -> Result<Allocation> {
        let space = self.space_of_subnet(subnet_id)?;
        let mut state = space.lock();

        let subnet = state
            .subnets
            .get(&subnet_id)
            .ok_or(Error::SubnetNotFound(subnet_id))?
            .clone();
        let space_cidr = state.record.cidr;
        if !space_cidr.contains(&ip) {
            return Err(Error::InvalidRequest(format!(
                "{ip} is outside address space {space_cidr}"
            )));
        }

        let duplicate = state
            .allocations
            .values()
            .any(|a| a.ip == ip && a.occupies_address());

        let allocation = Allocation::new(subnet_id, ip, assigned_to);
        self.allocation_index
            .insert(allocation.id, subnet.address_space_id);
        state.allocations.insert(allocation.id, allocation.clone());
        state.version += 1;

        if !subnet.contains(ip) {
            tracing::warn!(
                subnet_id = %subnet_id,
                ip = %ip,
                "Observed assignment lies outside its subnet"
            );
        } else if duplicate {
            tracing::warn!(
                subnet_id = %subnet_id,
                ip = %ip,
                "Observed assignment duplicates a live address"
            );
        } else {
            tracing::info!(subnet_id = %subnet_id, ip = %ip, "Observed external assignment");
        }
        Ok(allocation)
    }

    /// Deregister a device; its address returns to the pool.
    pub fn release_allocation(&self, allocation_id: Uuid) -> Result<()> {
        let space_id = self
            .allocation_index
            .get(&allocation_id)
            .map(|e| *e)
            .ok_or(Error::AllocationNotFound(allocation_id))?;
        let space = self.space(space_id)?;
        let mut state = space.lock();

        let alloc = state
            .allocations
            .get_mut(&allocation_id)
            .ok_or(Error::AllocationNotFound(allocation_id))?;
        alloc.state = AllocationState::Released;
        let ip = alloc.ip;
        state.version += 1;

        tracing::info!(allocation_id = %allocation_id, ip = %ip, "Released allocation");
        Ok(())
    }

    // ==================== Conflict detection & repair ====================

    /// Sweep one address space for duplicate addresses.
    ///
    /// Takes the space lock briefly; the grouping is read-consistent and
    /// never observes a half-written reassignment.
    pub fn scan(&self, space_id: Uuid) -> Result<Vec<ConflictRecord>> {
        let space = self.space(space_id)?;
        let mut state = space.lock();

        let SpaceState {
            allocations,
            conflicts,
            version,
            ..
        } = &mut *state;
        let records = detector::scan(allocations, conflicts);
        if !records.is_empty() {
            *version += 1;
        }
        drop(state);

        for record in &records {
            self.publish(AdvisoryEvent::ConflictDetected {
                record_id: record.id,
                ip: record.ip,
                claimants: record.allocation_ids.len(),
            });
        }
        Ok(records)
    }

    /// Repair one pending conflict record.
    pub fn resolve(&self, space_id: Uuid, record_id: Uuid) -> Result<ResolutionOutcome> {
        let space = self.space(space_id)?;
        let mut state = space.lock();

        let SpaceState {
            subnets,
            allocations,
            conflicts,
            version,
            ..
        } = &mut *state;
        let result = resolver::resolve(
            self.config.resolution_policy,
            record_id,
            subnets,
            allocations,
            conflicts,
        );
        if result.is_ok() {
            *version += 1;
        }
        drop(state);

        match &result {
            Ok(outcome) => self.publish(AdvisoryEvent::ConflictResolved {
                record_id,
                reassigned: outcome.reassigned.len(),
            }),
            Err(err) => {
                tracing::warn!(record_id = %record_id, error = %err, "Conflict repair failed");
                self.publish(AdvisoryEvent::ConflictUnresolved {
                    record_id,
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    /// Repair every pending conflict in a space.
    ///
    /// Takes the space lock per record, not for the whole sweep, so
    /// ordinary allocation requests interleave fairly. A stuck record is
    /// logged and skipped; it stays pending for the next sweep.
    pub fn resolve_all(&self, space_id: Uuid) -> Result<Vec<ResolutionOutcome>> {
        let pending: Vec<Uuid> = {
            let space = self.space(space_id)?;
            let state = space.lock();
            let mut ids: Vec<(chrono::DateTime<Utc>, Uuid)> = state
                .conflicts
                .values()
                .filter(|r| r.resolution == Resolution::Pending)
                .map(|r| (r.detected_at, r.id))
                .collect();
            ids.sort_unstable();
            ids.into_iter().map(|(_, id)| id).collect()
        };

        let mut outcomes = Vec::new();
        for record_id in pending {
            match self.resolve(space_id, record_id) {
                Ok(outcome) => outcomes.push(outcome),
                Err(Error::ResolutionExhausted(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }

    /// Dismiss a pending conflict record.
    pub fn ignore_conflict(&self, space_id: Uuid, record_id: Uuid) -> Result<()> {
        let space = self.space(space_id)?;
        let mut state = space.lock();
        let SpaceState {
            allocations,
            conflicts,
            version,
            ..
        } = &mut *state;
        resolver::ignore(record_id, allocations, conflicts)?;
        *version += 1;
        tracing::info!(record_id = %record_id, "Conflict dismissed by operator");
        Ok(())
    }

    // ==================== Unauthorized assignments ====================

    /// Sweep one space for allocations holding an address outside their
    /// own subnet's range.
    pub fn scan_unauthorized(&self, space_id: Uuid) -> Result<Vec<Allocation>> {
        let space = self.space(space_id)?;
        let state = space.lock();
        let found = detector::scan_unauthorized(&state.subnets, &state.allocations);
        drop(state);

        for alloc in &found {
            tracing::warn!(
                allocation_id = %alloc.id,
                ip = %alloc.ip,
                subnet_id = %alloc.subnet_id,
                "Allocation holds an address outside its subnet"
            );
            self.publish(AdvisoryEvent::UnauthorizedDetected {
                allocation_id: alloc.id,
                ip: alloc.ip,
                subnet_id: alloc.subnet_id,
            });
        }
        Ok(found)
    }

    /// Move unauthorized allocations back to free addresses inside their
    /// own subnet.
    ///
    /// An allocation whose subnet has no free address stays where it is,
    /// with a warning; the next sweep retries it.
    pub fn remediate_unauthorized(
        &self,
        space_id: Uuid,
    ) -> Result<Vec<(Uuid, Ipv4Addr)>> {
        let space = self.space(space_id)?;
        let mut state = space.lock();
        let SpaceState {
            subnets,
            allocations,
            version,
            ..
        } = &mut *state;

        let targets = detector::scan_unauthorized(subnets, allocations);
        let mut moves = Vec::new();
        for target in targets {
            let Some(subnet) = subnets.get(&target.subnet_id) else {
                continue;
            };
            let in_use: BTreeSet<u32> = allocations
                .values()
                .filter(|a| a.subnet_id == target.subnet_id && a.occupies_address())
                .map(|a| u32::from(a.ip))
                .collect();
            let Some(new_ip) = host::lowest_free(subnet.cidr, &in_use) else {
                tracing::warn!(
                    allocation_id = %target.id,
                    subnet_id = %target.subnet_id,
                    "No free address to pull an unauthorized allocation into its subnet"
                );
                continue;
            };
            if let Some(alloc) = allocations.get_mut(&target.id) {
                alloc.ip = new_ip;
                alloc.state = AllocationState::Resolved;
            }
            *version += 1;
            moves.push((target.id, target.ip, new_ip));
        }
        drop(state);

        let mut outcome = Vec::new();
        for (id, old_ip, new_ip) in moves {
            tracing::info!(
                allocation_id = %id,
                old_ip = %old_ip,
                new_ip = %new_ip,
                "Moved unauthorized allocation into its subnet"
            );
            self.publish(AdvisoryEvent::UnauthorizedRemediated {
                allocation_id: id,
                old_ip,
                new_ip,
            });
            outcome.push((id, new_ip));
        }
        Ok(outcome)
    }

    // ==================== Telemetry ====================

    /// Accept a collector snapshot; only the newest per subnet is kept.
    pub fn ingest_snapshot(&self, snapshot: UtilizationSnapshot) {
        match self.snapshots.get(&snapshot.subnet_id) {
            Some(existing) if existing.timestamp > snapshot.timestamp => {}
            _ => {
                self.snapshots.insert(snapshot.subnet_id, snapshot);
            }
        }
    }

    pub fn latest_snapshot(&self, subnet_id: Uuid) -> Option<UtilizationSnapshot> {
        self.snapshots.get(&subnet_id).map(|s| s.clone())
    }

    /// Live utilization computed from the allocation table.
    pub fn utilization(&self, subnet_id: Uuid) -> Result<UtilizationSnapshot> {
        let space = self.space_of_subnet(subnet_id)?;
        let state = space.lock();
        let subnet = state
            .subnets
            .get(&subnet_id)
            .ok_or(Error::SubnetNotFound(subnet_id))?;
        let used_count = state
            .allocations
            .values()
            .filter(|a| a.subnet_id == subnet_id && a.occupies_address())
            .count() as u32;
        Ok(UtilizationSnapshot {
            subnet_id,
            timestamp: Utc::now(),
            used_count,
            capacity: subnet.usable_hosts(),
        })
    }

    // ==================== Queries ====================

    pub fn list_spaces(&self) -> Vec<AddressSpace> {
        let mut spaces: Vec<AddressSpace> = self
            .spaces
            .iter()
            .map(|e| e.value().lock().record.clone())
            .collect();
        spaces.sort_by_key(|s| s.cidr);
        spaces
    }

    pub fn get_space(&self, space_id: Uuid) -> Result<AddressSpace> {
        Ok(self.space(space_id)?.lock().record.clone())
    }

    pub fn get_subnet(&self, subnet_id: Uuid) -> Result<Subnet> {
        let space = self.space_of_subnet(subnet_id)?;
        let state = space.lock();
        state
            .subnets
            .get(&subnet_id)
            .cloned()
            .ok_or(Error::SubnetNotFound(subnet_id))
    }

    pub fn list_subnets(&self, space_id: Uuid) -> Result<Vec<Subnet>> {
        let space = self.space(space_id)?;
        let state = space.lock();
        let mut subnets: Vec<Subnet> = state.subnets.values().cloned().collect();
        subnets.sort_by_key(|s| s.cidr);
        Ok(subnets)
    }

    pub fn list_allocations(&self, subnet_id: Uuid) -> Result<Vec<Allocation>> {
        let space = self.space_of_subnet(subnet_id)?;
        let state = space.lock();
        let mut allocations: Vec<Allocation> = state
            .allocations
            .values()
            .filter(|a| a.subnet_id == subnet_id)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| (a.ip, a.assigned_at));
        Ok(allocations)
    }

    pub fn pending_conflicts(&self, space_id: Uuid) -> Result<Vec<ConflictRecord>> {
        let space = self.space(space_id)?;
        let state = space.lock();
        let mut records: Vec<ConflictRecord> = state
            .conflicts
            .values()
            .filter(|r| r.resolution == Resolution::Pending)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.ip, r.detected_at));
        Ok(records)
    }

    /// Current free blocks of a space, in deterministic order.
    pub fn free_blocks(&self, space_id: Uuid) -> Result<Vec<FreeBlock>> {
        Ok(self.space(space_id)?.lock().free.free_blocks())
    }

    pub fn free_addresses(&self, space_id: Uuid) -> Result<u64> {
        Ok(self.space(space_id)?.lock().free.free_addresses())
    }

    /// Mutation counter for read-consistency assertions.
    pub fn version(&self, space_id: Uuid) -> Result<u64> {
        Ok(self.space(space_id)?.lock().version)
    }

    /// Full read-only report for one space.
    pub fn report(&self, space_id: Uuid) -> Result<SpaceReport> {
        let space = self.space(space_id)?;
        let state = space.lock();
        let mut subnets: Vec<Subnet> = state.subnets.values().cloned().collect();
        subnets.sort_by_key(|s| s.cidr);
        let mut allocations: Vec<Allocation> = state.allocations.values().cloned().collect();
        allocations.sort_by_key(|a| (a.ip, a.assigned_at));
        let mut pending_conflicts: Vec<ConflictRecord> = state
            .conflicts
            .values()
            .filter(|r| r.resolution == Resolution::Pending)
            .cloned()
            .collect();
        pending_conflicts.sort_by_key(|r| (r.ip, r.detected_at));
        Ok(SpaceReport {
            space: state.record.clone(),
            free_addresses: state.free.free_addresses(),
            subnets,
            allocations,
            pending_conflicts,
        })
    }

    pub(crate) fn with_space_state<T>(
        &self,
        space_id: Uuid,
        f: impl FnOnce(&SpaceState) -> T,
    ) -> Result<T> {
        let space = self.space(space_id)?;
        let state = space.lock();
        Ok(f(&state))
    }
}

impl Default for AddressManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn net(s: &str) -> Ipv4Net {
        Ipv4Net::from_str(s).unwrap()
    }

    fn manager_with_space(cidr: &str) -> (AddressManager, Uuid) {
        let manager = AddressManager::new();
        let space = manager.create_address_space("test", net(cidr)).unwrap();
        (manager, space.id)
    }

    #[test]
    fn test_vlsm_carving_scenario() {
        let (manager, space_id) = manager_with_space("10.0.0.0/16");

        let first = manager.allocate_subnet(space_id, 50, "eng").unwrap();
        assert_eq!(first.cidr.to_string(), "10.0.0.0/26");
        assert_eq!(first.usable_hosts(), 62);

        let second = manager.allocate_subnet(space_id, 50, "sales").unwrap();
        assert_eq!(second.cidr.to_string(), "10.0.0.64/26");

        // Releasing the first and re-requesting reuses the lowest block.
        manager.release_subnet(first.id).unwrap();
        let third = manager.allocate_subnet(space_id, 50, "it").unwrap();
        assert_eq!(third.cidr.to_string(), "10.0.0.0/26");
    }

    #[test]
    fn test_exhaustion_never_returns_partial() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let err = manager.allocate_subnet(space_id, 1000, "big").unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { .. }));
        // The space is untouched.
        assert_eq!(manager.free_addresses(space_id).unwrap(), 256);
    }

    #[test]
    fn test_host_assignment_lowest_first() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();

        let a = manager.allocate_host(subnet.id, None, "host-a").unwrap();
        let b = manager.allocate_host(subnet.id, None, "host-b").unwrap();
        assert_eq!(
            a.ip,
            Ipv4Addr::from(u32::from(subnet.network_address()) + 1)
        );
        assert_eq!(u32::from(b.ip), u32::from(a.ip) + 1);
    }

    #[test]
    fn test_preferred_ip_collision() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();
        let ip = Ipv4Addr::new(10, 0, 0, 5);

        manager.allocate_host(subnet.id, Some(ip), "host-a").unwrap();
        let err = manager
            .allocate_host(subnet.id, Some(ip), "host-b")
            .unwrap_err();
        assert!(matches!(err, Error::AddressInUse(addr) if addr == ip));

        // Network and broadcast addresses are never assignable.
        assert!(manager
            .allocate_host(subnet.id, Some(subnet.network_address()), "x")
            .is_err());
        assert!(manager
            .allocate_host(subnet.id, Some(subnet.broadcast_address()), "x")
            .is_err());
    }

    #[test]
    fn test_released_address_is_reused() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();

        let a = manager.allocate_host(subnet.id, None, "host-a").unwrap();
        manager.allocate_host(subnet.id, None, "host-b").unwrap();
        manager.release_allocation(a.id).unwrap();

        let c = manager.allocate_host(subnet.id, None, "host-c").unwrap();
        assert_eq!(c.ip, a.ip);
    }

    #[test]
    fn test_release_subnet_requires_empty() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();
        let alloc = manager.allocate_host(subnet.id, None, "host-a").unwrap();

        let err = manager.release_subnet(subnet.id).unwrap_err();
        assert!(matches!(err, Error::SubnetNotEmpty(_, 1)));

        manager.release_allocation(alloc.id).unwrap();
        manager.release_subnet(subnet.id).unwrap();
        assert_eq!(manager.free_addresses(space_id).unwrap(), 256);
        assert!(manager.get_subnet(subnet.id).is_err());
    }

    #[test]
    fn test_observed_duplicate_seeds_conflict() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();

        let owned = manager.allocate_host(subnet.id, None, "host-a").unwrap();
        // An out-of-band report lands on the same address.
        let rogue = manager
            .register_observed(subnet.id, owned.ip, "rogue-device")
            .unwrap();

        let records = manager.scan(space_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, owned.ip);
        assert!(records[0].allocation_ids.contains(&owned.id));
        assert!(records[0].allocation_ids.contains(&rogue.id));
    }

    #[test]
    fn test_scan_and_resolve_round_trip() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();

        let keeper = manager.allocate_host(subnet.id, None, "host-a").unwrap();
        let rogue = manager
            .register_observed(subnet.id, keeper.ip, "rogue")
            .unwrap();

        let records = manager.scan(space_id).unwrap();
        let outcome = manager.resolve(space_id, records[0].id).unwrap();

        // Earliest assignment wins by default.
        assert_eq!(outcome.kept, Some(keeper.id));
        assert_eq!(outcome.reassigned.len(), 1);
        assert_eq!(outcome.reassigned[0].0, rogue.id);

        // Second scan is clean and pending conflicts are gone.
        assert!(manager.scan(space_id).unwrap().is_empty());
        assert!(manager.pending_conflicts(space_id).unwrap().is_empty());
    }

    #[test]
    fn test_per_space_serialization_under_threads() {
        let (manager, space_id) = manager_with_space("10.0.0.0/16");
        let subnet = manager.allocate_subnet(space_id, 200, "shared").unwrap();
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let manager = manager.clone();
                let subnet_id = subnet.id;
                std::thread::spawn(move || {
                    (0..16)
                        .map(|i| {
                            manager
                                .allocate_host(subnet_id, None, format!("w{worker}-{i}"))
                                .unwrap()
                                .ip
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Ipv4Addr> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        // Serialized through the space lock: no duplicate assignments.
        assert_eq!(all.len(), total);
    }

    #[test]
    fn test_snapshot_keeps_newest() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();

        let newer = UtilizationSnapshot {
            subnet_id: subnet.id,
            timestamp: Utc::now(),
            used_count: 9,
            capacity: 14,
        };
        let older = UtilizationSnapshot {
            subnet_id: subnet.id,
            timestamp: newer.timestamp - chrono::Duration::minutes(5),
            used_count: 3,
            capacity: 14,
        };
        manager.ingest_snapshot(newer.clone());
        manager.ingest_snapshot(older);
        assert_eq!(
            manager.latest_snapshot(subnet.id).unwrap().used_count,
            newer.used_count
        );
    }

    #[test]
    fn test_live_utilization() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();
        manager.allocate_host(subnet.id, None, "a").unwrap();
        manager.allocate_host(subnet.id, None, "b").unwrap();

        let snap = manager.utilization(subnet.id).unwrap();
        assert_eq!(snap.used_count, 2);
        assert_eq!(snap.capacity, 14);
    }

    #[test]
    fn test_unknown_ids_are_notfound() {
        let manager = AddressManager::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            manager.scan(id),
            Err(Error::AddressSpaceNotFound(_))
        ));
        assert!(matches!(
            manager.allocate_host(id, None, "x"),
            Err(Error::SubnetNotFound(_))
        ));
        assert!(matches!(
            manager.release_allocation(id),
            Err(Error::AllocationNotFound(_))
        ));
    }

    #[test]
    fn test_observed_out_of_subnet_is_unauthorized() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 10, "lab").unwrap();

        // Inside the space, outside the subnet: accepted, flagged later.
        let stray = manager
            .register_observed(subnet.id, Ipv4Addr::new(10, 0, 0, 200), "printer")
            .unwrap();

        let found = manager.scan_unauthorized(space_id).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stray.id);

        let moves = manager.remediate_unauthorized(space_id).unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].0, stray.id);
        assert!(subnet.contains(moves[0].1));

        // A follow-up sweep finds a clean space.
        assert!(manager.scan_unauthorized(space_id).unwrap().is_empty());

        // Outside the space is still rejected outright.
        assert!(manager
            .register_observed(subnet.id, Ipv4Addr::new(192, 168, 1, 1), "x")
            .is_err());
    }

    #[test]
    fn test_remediation_skips_full_subnets() {
        let (manager, space_id) = manager_with_space("10.0.0.0/24");
        let subnet = manager.allocate_subnet(space_id, 2, "p2p").unwrap();
        manager.allocate_host(subnet.id, None, "a").unwrap();
        manager.allocate_host(subnet.id, None, "b").unwrap();

        let stray = manager
            .register_observed(subnet.id, Ipv4Addr::new(10, 0, 0, 200), "stray")
            .unwrap();

        // Nowhere to put it; the allocation stays put and stays flagged.
        assert!(manager.remediate_unauthorized(space_id).unwrap().is_empty());
        let still = manager.scan_unauthorized(space_id).unwrap();
        assert_eq!(still.len(), 1);
        assert_eq!(still[0].ip, stray.ip);
    }

    #[test]
    fn test_overflow_sibling_links_its_source() {
        let (manager, space_id) = manager_with_space("10.0.0.0/16");
        let source = manager.allocate_subnet(space_id, 50, "eng").unwrap();

        let overflow = manager.allocate_overflow(source.id).unwrap();
        assert_eq!(overflow.cidr.prefix_len(), source.cidr.prefix_len());
        assert_eq!(overflow.overflow_of, Some(source.id));
        assert_eq!(overflow.tag, "eng-overflow");
        assert!(source.overflow_of.is_none());
    }

    #[test]
    fn test_host_bits_rejected() {
        let manager = AddressManager::new();
        let err = manager
            .create_address_space("bad", net("10.0.0.1/16"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
