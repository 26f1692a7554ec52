//! Conflict records and resolution policy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use uuid::Uuid;

use super::Allocation;

/// Resolution state of a conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Detected, not yet repaired
    Pending,
    /// Losers were moved to fresh addresses
    Reassigned,
    /// Dismissed by an operator
    Ignored,
}

/// A detected duplicate-address condition
///
/// Ephemeral: created by a detector sweep, closed by resolution. Two
/// records are the same conflict when their content matches; ids are
/// regenerated freely across sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique record identifier
    pub id: Uuid,
    /// The disputed address
    pub ip: Ipv4Addr,
    /// Allocations claiming the address (always >= 2 at detection)
    pub allocation_ids: BTreeSet<Uuid>,
    /// Detection timestamp
    pub detected_at: DateTime<Utc>,
    /// Current resolution state
    pub resolution: Resolution,
}

impl ConflictRecord {
    pub fn new(ip: Ipv4Addr, allocation_ids: BTreeSet<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip,
            allocation_ids,
            detected_at: Utc::now(),
            resolution: Resolution::Pending,
        }
    }

    /// Content identity, independent of record id and detection time.
    pub fn same_conflict(&self, other: &ConflictRecord) -> bool {
        self.ip == other.ip && self.allocation_ids == other.allocation_ids
    }
}

/// Outcome of repairing one conflict record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    /// The repaired record
    pub record_id: Uuid,
    /// The allocation that kept the disputed address
    pub kept: Option<Uuid>,
    /// Losing allocations and the fresh addresses they were moved to
    pub reassigned: Vec<(Uuid, Ipv4Addr)>,
}

/// Tie-break rule deciding which claimant keeps a disputed address
///
/// Earliest-assignment-wins is the documented default; the rule is
/// configurable rather than hard-coded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// The oldest `assigned_at` keeps the address
    #[default]
    EarliestAssignedWins,
    /// The newest `assigned_at` keeps the address
    LatestAssignedWins,
}

impl ResolutionPolicy {
    /// Pick the winner among the claimants.
    ///
    /// Ties on `assigned_at` fall back to allocation id, so the choice is
    /// deterministic for a fixed set of records.
    pub fn winner<'a>(&self, claimants: &'a [Allocation]) -> Option<&'a Allocation> {
        match self {
            ResolutionPolicy::EarliestAssignedWins => claimants
                .iter()
                .min_by_key(|a| (a.assigned_at, a.id)),
            ResolutionPolicy::LatestAssignedWins => claimants
                .iter()
                .max_by_key(|a| (a.assigned_at, a.id)),
        }
    }
}
