//! Top-level address space record

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A top-level CIDR block from which subnets are carved
///
/// Created once at provisioning time, rarely destroyed. All subnets and
/// allocations of a space lie within its CIDR range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpace {
    /// Unique space identifier
    pub id: Uuid,
    /// Human-readable name (e.g. "dc-west pool")
    pub name: String,
    /// The full range owned by this space
    pub cidr: Ipv4Net,
    /// Provisioning timestamp
    pub created_at: DateTime<Utc>,
}

impl AddressSpace {
    /// Create a new address space over the given CIDR block.
    ///
    /// The CIDR must be in canonical form (host bits zero).
    pub fn new(name: impl Into<String>, cidr: Ipv4Net) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cidr,
            created_at: Utc::now(),
        }
    }

    /// Total addresses covered by this space.
    pub fn total_addresses(&self) -> u64 {
        1u64 << (32 - self.cidr.prefix_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_total_addresses() {
        let space = AddressSpace::new("dc", Ipv4Net::from_str("10.0.0.0/16").unwrap());
        assert_eq!(space.total_addresses(), 65536);

        let host = AddressSpace::new("p2p", Ipv4Net::from_str("10.0.0.1/32").unwrap());
        assert_eq!(host.total_addresses(), 1);
    }
}
