//! VLSM carving primitives
//!
//! The free-block index owns the free half of an address space's
//! free/used partition; `vlsm` computes prefix sizes from host counts and
//! `host` picks individual addresses inside a carved subnet.

mod free_block;
pub mod host;
pub mod vlsm;

pub use free_block::{FreeBlock, FreeBlockIndex};
