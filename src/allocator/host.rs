//! Host address selection within a carved subnet

use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Inclusive range of host-assignable addresses in a subnet.
///
/// Below /31 the network and broadcast addresses are excluded; a /31 or
/// /32 uses its whole range.
pub fn usable_range(cidr: Ipv4Net) -> (u32, u32) {
    let network = u32::from(cidr.network());
    let broadcast = u32::from(cidr.broadcast());
    if cidr.prefix_len() >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    }
}

/// Whether an address may be assigned to a host in this subnet.
pub fn is_usable(cidr: Ipv4Net, ip: Ipv4Addr) -> bool {
    let (first, last) = usable_range(cidr);
    let ip = u32::from(ip);
    ip >= first && ip <= last
}

/// Lowest usable address not present in `in_use`.
///
/// Walks the sorted in-use set rather than the address range, so the cost
/// is bounded by the number of live allocations in the subnet.
pub fn lowest_free(cidr: Ipv4Net, in_use: &BTreeSet<u32>) -> Option<Ipv4Addr> {
    let (first, last) = usable_range(cidr);
    let mut candidate = first;
    for &used in in_use.range(first..=last) {
        if used > candidate {
            break;
        }
        if candidate == last {
            return None;
        }
        candidate += 1;
    }
    Some(Ipv4Addr::from(candidate))
}
