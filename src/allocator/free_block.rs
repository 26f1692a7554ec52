//! Binary-buddy free-block index for one address space
//!
//! The set of free blocks, together with the carved subnets, exactly tiles
//! the space. Blocks are mask-aligned by construction; releases coalesce
//! eagerly with their buddy so fragmentation never accumulates. Uses a
//! BTreeSet ordered by `(prefix_len, base)`, which is exactly the
//! best-fit/lowest-base tie-break order.

use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A free, maximally-coalesced, mask-aligned block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FreeBlock {
    /// Prefix length of the block
    pub prefix_len: u8,
    /// Network address of the block, as u32
    pub base: u32,
}

impl FreeBlock {
    /// Addresses covered by this block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix_len)
    }

    /// Last address of this block, inclusive.
    fn end(&self) -> u32 {
        self.base + (self.size() - 1) as u32
    }

    fn overlaps(&self, base: u32, end: u32) -> bool {
        self.base <= end && base <= self.end()
    }

    /// The block as a CIDR net.
    pub fn cidr(&self) -> Result<Ipv4Net> {
        Ok(Ipv4Net::new(Ipv4Addr::from(self.base), self.prefix_len)?)
    }
}

/// Free-block index over one top-level CIDR block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBlockIndex {
    space_id: Uuid,
    space: Ipv4Net,
    free: BTreeSet<FreeBlock>,
}

impl FreeBlockIndex {
    /// Create an index with the whole space free.
    pub fn new(space_id: Uuid, space: Ipv4Net) -> Self {
        let mut free = BTreeSet::new();
        free.insert(FreeBlock {
            prefix_len: space.prefix_len(),
            base: u32::from(space.network()),
        });
        Self {
            space_id,
            space,
            free,
        }
    }

    /// The top-level CIDR this index covers.
    pub fn space(&self) -> Ipv4Net {
        self.space
    }

    /// Carve a block of the requested size.
    ///
    /// Best-fit: the smallest free block that can hold the request wins,
    /// ties broken by lowest base address. Larger blocks are split in half
    /// recursively, the unused upper halves pushed back as free. Fails
    /// without touching the index.
    pub fn reserve(&mut self, prefix_len: u8) -> Result<Ipv4Net> {
        if prefix_len > 32 {
            return Err(Error::InvalidRequest(format!(
                "prefix length /{prefix_len} is out of range"
            )));
        }
        // A block bigger than the whole space is a capacity failure, not
        // a malformed request: no space of this size will ever be free.
        if prefix_len < self.space.prefix_len() {
            return Err(Error::CapacityExhausted {
                space_id: self.space_id,
                prefix_len,
            });
        }

        // Smallest adequate block first, lowest base within a size class.
        let found = (self.space.prefix_len()..=prefix_len)
            .rev()
            .find_map(|q| {
                self.free
                    .range(
                        FreeBlock {
                            prefix_len: q,
                            base: 0,
                        }..=FreeBlock {
                            prefix_len: q,
                            base: u32::MAX,
                        },
                    )
                    .next()
                    .copied()
            })
            .ok_or(Error::CapacityExhausted {
                space_id: self.space_id,
                prefix_len,
            })?;

        self.free.remove(&found);

        // Buddy split: keep the lower half, free the upper half, repeat.
        let base = found.base;
        let mut split_at = found.prefix_len;
        while split_at < prefix_len {
            split_at += 1;
            let half = 1u32 << (32 - split_at);
            self.free.insert(FreeBlock {
                prefix_len: split_at,
                base: base + half,
            });
        }

        Ok(Ipv4Net::new(Ipv4Addr::from(base), prefix_len)?)
    }

    /// Carve a specific block out of the free pool.
    ///
    /// Used to rebuild the index from persisted subnets. Fails without
    /// touching the index if the block is not wholly free.
    pub fn reserve_exact(&mut self, cidr: Ipv4Net) -> Result<()> {
        let cidr = cidr.trunc();
        self.check_bounds(cidr)?;

        let target = u32::from(cidr.network());
        let container = (self.space.prefix_len()..=cidr.prefix_len())
            .find_map(|q| {
                let block = FreeBlock {
                    prefix_len: q,
                    base: mask_to_prefix(target, q),
                };
                self.free.contains(&block).then_some(block)
            })
            .ok_or_else(|| {
                Error::InvalidRequest(format!("block {cidr} is not free"))
            })?;

        self.free.remove(&container);

        // Split toward the target, freeing the halves that miss it.
        let mut base = container.base;
        let mut split_at = container.prefix_len;
        while split_at < cidr.prefix_len() {
            split_at += 1;
            let half = 1u32 << (32 - split_at);
            if target & half == 0 {
                self.free.insert(FreeBlock {
                    prefix_len: split_at,
                    base: base + half,
                });
            } else {
                self.free.insert(FreeBlock {
                    prefix_len: split_at,
                    base,
                });
                base += half;
            }
        }

        Ok(())
    }

    /// Return a block to the free pool, coalescing with its buddy
    /// recursively until the buddy is in use or the space root is reached.
    pub fn release(&mut self, cidr: Ipv4Net) -> Result<()> {
        let cidr = cidr.trunc();
        self.check_bounds(cidr)?;

        let base = u32::from(cidr.network());
        let end = u32::from(cidr.broadcast());
        if self.free.iter().any(|b| b.overlaps(base, end)) {
            return Err(Error::InvalidRequest(format!(
                "block {cidr} is already free"
            )));
        }

        let mut base = base;
        let mut prefix_len = cidr.prefix_len();
        while prefix_len > self.space.prefix_len() {
            let bit = 1u32 << (32 - prefix_len);
            let buddy = FreeBlock {
                prefix_len,
                base: base ^ bit,
            };
            if !self.free.remove(&buddy) {
                break;
            }
            base &= !bit;
            prefix_len -= 1;
        }
        self.free.insert(FreeBlock { prefix_len, base });

        Ok(())
    }

    /// Whether a block of the given size could currently be carved.
    pub fn can_fit(&self, prefix_len: u8) -> bool {
        prefix_len >= self.space.prefix_len()
            && self.free.iter().any(|b| b.prefix_len <= prefix_len)
    }

    /// All free blocks, in `(prefix_len, base)` order.
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        self.free.iter().copied().collect()
    }

    /// Total free addresses.
    pub fn free_addresses(&self) -> u64 {
        self.free.iter().map(FreeBlock::size).sum()
    }

    fn check_bounds(&self, cidr: Ipv4Net) -> Result<()> {
        if cidr.prefix_len() < self.space.prefix_len()
            || !self.space.contains(&cidr.network())
        {
            return Err(Error::InvalidRequest(format!(
                "block {cidr} is outside address space {}",
                self.space
            )));
        }
        Ok(())
    }
}

/// Top `prefix_len` bits of an address.
fn mask_to_prefix(addr: u32, prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        addr & (!0u32 << (32 - prefix_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn index(cidr: &str) -> FreeBlockIndex {
        FreeBlockIndex::new(Uuid::new_v4(), Ipv4Net::from_str(cidr).unwrap())
    }

    #[test]
    fn test_reserve_splits_from_the_bottom() {
        let mut idx = index("10.0.0.0/16");

        let first = idx.reserve(26).unwrap();
        assert_eq!(first.to_string(), "10.0.0.0/26");

        let second = idx.reserve(26).unwrap();
        assert_eq!(second.to_string(), "10.0.0.64/26");
    }

    #[test]
    fn test_split_leaves_buddy_halves_free() {
        let mut idx = index("10.0.0.0/24");
        idx.reserve(26).unwrap();

        // Splitting /24 -> /25 -> /26 frees 10.0.0.64/26 and 10.0.0.128/25.
        let free = idx.free_blocks();
        assert_eq!(
            free,
            vec![
                FreeBlock {
                    prefix_len: 25,
                    base: u32::from(Ipv4Addr::new(10, 0, 0, 128)),
                },
                FreeBlock {
                    prefix_len: 26,
                    base: u32::from(Ipv4Addr::new(10, 0, 0, 64)),
                },
            ]
        );
        assert_eq!(idx.free_addresses(), 192);
    }

    #[test]
    fn test_best_fit_prefers_smallest_block() {
        let mut idx = index("10.0.0.0/16");
        // Carve a /24 then release it, leaving free blocks of several sizes
        // after an unrelated /20 carve fragments the space.
        let small = idx.reserve(24).unwrap();
        let big = idx.reserve(20).unwrap();
        idx.release(small).unwrap();

        // The freed /24 is the smallest adequate hole for a /24.
        let again = idx.reserve(24).unwrap();
        assert_eq!(again, small);
        assert_ne!(again.network(), big.network());
    }

    #[test]
    fn test_release_coalesces_buddies() {
        let mut idx = index("10.0.0.0/24");
        let before = idx.free_blocks();

        let a = idx.reserve(26).unwrap();
        let b = idx.reserve(26).unwrap();
        assert_eq!(b.to_string(), "10.0.0.64/26");

        idx.release(a).unwrap();
        idx.release(b).unwrap();

        // Buddies merge back into /25, then into the original /24.
        assert_eq!(idx.free_blocks(), before);
        assert_eq!(idx.free_addresses(), 256);
    }

    #[test]
    fn test_round_trip_restores_index() {
        let mut idx = index("10.0.0.0/16");
        let snapshot = idx.free_blocks();

        let net = idx.reserve(22).unwrap();
        assert_ne!(idx.free_blocks(), snapshot);

        idx.release(net).unwrap();
        assert_eq!(idx.free_blocks(), snapshot);
    }

    #[test]
    fn test_exhaustion_fails_cleanly() {
        let mut idx = index("10.0.0.0/28");
        idx.reserve(29).unwrap();
        idx.reserve(29).unwrap();

        let before = idx.free_blocks();
        let err = idx.reserve(29).unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { prefix_len: 29, .. }));
        // Failure leaves the index untouched.
        assert_eq!(idx.free_blocks(), before);
    }

    #[test]
    fn test_request_larger_than_space_is_capacity_exhausted() {
        // A /16 can never come out of a /24; that is exhaustion, and the
        // caller's exit-code mapping depends on it.
        let mut idx = index("10.0.0.0/24");
        assert!(matches!(
            idx.reserve(16),
            Err(Error::CapacityExhausted { prefix_len: 16, .. })
        ));
        // An impossible prefix is the malformed-request case.
        assert!(matches!(idx.reserve(33), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_reserve_exact_carves_around_target() {
        let mut idx = index("10.0.0.0/24");
        let target = Ipv4Net::from_str("10.0.0.64/26").unwrap();
        idx.reserve_exact(target).unwrap();

        assert_eq!(
            idx.free_blocks(),
            vec![
                FreeBlock {
                    prefix_len: 25,
                    base: u32::from(Ipv4Addr::new(10, 0, 0, 128)),
                },
                FreeBlock {
                    prefix_len: 26,
                    base: u32::from(Ipv4Addr::new(10, 0, 0, 0)),
                },
            ]
        );

        // Same block twice is an error, and a harmless one.
        let before = idx.free_blocks();
        assert!(idx.reserve_exact(target).is_err());
        assert_eq!(idx.free_blocks(), before);

        // Releasing it merges everything back.
        idx.release(target).unwrap();
        assert_eq!(idx.free_addresses(), 256);
        assert_eq!(idx.free_blocks().len(), 1);
    }

    #[test]
    fn test_double_release_rejected() {
        let mut idx = index("10.0.0.0/24");
        let net = idx.reserve(26).unwrap();
        idx.release(net).unwrap();

        let before = idx.free_blocks();
        assert!(matches!(idx.release(net), Err(Error::InvalidRequest(_))));
        assert_eq!(idx.free_blocks(), before);
    }

    #[test]
    fn test_release_outside_space_rejected() {
        let mut idx = index("10.0.0.0/24");
        let outside = Ipv4Net::from_str("192.168.0.0/26").unwrap();
        assert!(matches!(
            idx.release(outside),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_deterministic_partition() {
        // Same call sequence, same resulting partition, regardless of how
        // many times it runs.
        let run = || {
            let mut idx = FreeBlockIndex::new(
                Uuid::nil(),
                Ipv4Net::from_str("10.0.0.0/16").unwrap(),
            );
            let a = idx.reserve(26).unwrap();
            let b = idx.reserve(20).unwrap();
            let c = idx.reserve(26).unwrap();
            idx.release(b).unwrap();
            let d = idx.reserve(24).unwrap();
            (a, c, d, idx.free_blocks())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_tiling_invariant_under_churn() {
        let mut idx = index("10.0.0.0/20");
        let total = 1u64 << 12;

        let mut held = Vec::new();
        for prefix in [26u8, 24, 26, 22, 28] {
            held.push(idx.reserve(prefix).unwrap());
        }
        // Free + held always tile the space exactly.
        let held_sum: u64 = held
            .iter()
            .map(|n| 1u64 << (32 - n.prefix_len()))
            .sum();
        assert_eq!(idx.free_addresses() + held_sum, total);

        // No free block overlaps a held block.
        for block in idx.free_blocks() {
            let b = block.cidr().unwrap();
            for h in &held {
                assert!(!h.contains(&b.network()) && !b.contains(&h.network()));
            }
        }

        for net in held {
            idx.release(net).unwrap();
        }
        assert_eq!(idx.free_addresses(), total);
        assert_eq!(idx.free_blocks().len(), 1);
    }

    #[test]
    fn test_alignment_invariant() {
        let mut idx = index("10.0.0.0/16");
        for prefix in [26u8, 22, 30, 19, 32] {
            let net = idx.reserve(prefix).unwrap();
            let size = 1u64 << (32 - prefix);
            assert_eq!(u64::from(u32::from(net.network())) % size, 0);
        }
    }
}
