//! Orchestration service

pub(crate) mod manager;

pub use manager::{AddressManager, ManagerConfig, SpaceReport};
