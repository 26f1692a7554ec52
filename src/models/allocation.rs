//! Subnet and host allocation records

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

use crate::allocator::vlsm;

/// A carved subnet, owned by exactly one address space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    /// Unique subnet identifier
    pub id: Uuid,
    /// Owning address space
    pub address_space_id: Uuid,
    /// CIDR block (mask-aligned by construction)
    pub cidr: Ipv4Net,
    /// Purpose tag (e.g. "engineering", "storage-overflow")
    pub tag: String,
    /// Subnet this one was carved to extend, for overflow siblings
    #[serde(default)]
    pub overflow_of: Option<Uuid>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Subnet {
    pub fn new(address_space_id: Uuid, cidr: Ipv4Net, tag: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address_space_id,
            cidr,
            tag: tag.into(),
            overflow_of: None,
            created_at: Utc::now(),
        }
    }

    pub fn network_address(&self) -> Ipv4Addr {
        self.cidr.network()
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.cidr.broadcast()
    }

    /// Number of host-assignable addresses in this subnet.
    pub fn usable_hosts(&self) -> u32 {
        vlsm::usable_count(self.cidr.prefix_len())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.cidr.contains(&ip)
    }
}

/// Lifecycle state of a host allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    /// Address is assigned and undisputed
    Active,
    /// Referenced by a pending conflict record
    Conflicted,
    /// Reassigned to a fresh address during conflict repair
    Resolved,
    /// Device deregistered; address returned to the pool
    Released,
}

/// A host address assignment within a subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique allocation identifier
    pub id: Uuid,
    /// Owning subnet
    pub subnet_id: Uuid,
    /// Assigned address
    pub ip: Ipv4Addr,
    /// Device identifier this address is assigned to
    pub assigned_to: String,
    /// Assignment timestamp (the conflict-resolution tie-break key)
    pub assigned_at: DateTime<Utc>,
    /// Lifecycle state
    pub state: AllocationState,
}

impl Allocation {
    pub fn new(subnet_id: Uuid, ip: Ipv4Addr, assigned_to: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subnet_id,
            ip,
            assigned_to: assigned_to.into(),
            assigned_at: Utc::now(),
            state: AllocationState::Active,
        }
    }

    /// Whether this allocation currently occupies its address.
    ///
    /// Everything short of `Released` holds an address: a `Conflicted`
    /// allocation still points at the disputed address and a `Resolved`
    /// one owns its replacement.
    pub fn occupies_address(&self) -> bool {
        self.state != AllocationState::Released
    }
}
