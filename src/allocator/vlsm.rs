//! Prefix-length arithmetic for variable-length subnet masking

use crate::{Error, Result};

/// Number of host-assignable addresses in a block of the given prefix.
///
/// Network and broadcast addresses are excluded below /31; a /31 is a
/// point-to-point pair and a /32 a host route, with no reduction.
pub fn usable_count(prefix_len: u8) -> u32 {
    match prefix_len {
        32 => 1,
        31 => 2,
        p if p < 31 => ((1u64 << (32 - p)) - 2) as u32,
        _ => 0,
    }
}

/// Minimal subnet size (largest prefix length) whose usable-address count
/// covers the requested host count.
pub fn prefix_for_hosts(requested_hosts: u32) -> Result<u8> {
    if requested_hosts == 0 {
        return Err(Error::InvalidRequest(
            "requested host count must be positive".to_string(),
        ));
    }

    for prefix_len in (0..=32u8).rev() {
        if usable_count(prefix_len) >= requested_hosts {
            return Ok(prefix_len);
        }
    }

    Err(Error::InvalidRequest(format!(
        "{requested_hosts} hosts exceed any IPv4 subnet"
    )))
}
