//! Conflict detection and repair
//!
//! Detection is a read-driven sweep over the allocation table, independent
//! of the free-block index: conflicts come from out-of-band writes that
//! bypass allocation-time checks, so they cannot be prevented, only found
//! and repaired.

pub mod detector;
pub mod resolver;
