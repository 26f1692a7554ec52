//! IPv4 Address Space Allocation & Conflict Resolution Engine
//!
//! Programmatic address management for data-center networks:
//! - Variable-length subnet carving from top-level address spaces
//! - Best-fit free-block selection with buddy-style coalescing
//! - Host address assignment with preferred-address support
//! - Duplicate-address detection and policy-driven repair
//! - Forecast-driven capacity advisories with proactive overflow carving
//!
//! The engine is the single source of truth for who holds which address.
//! External collaborators (the telemetry collector, the forecast
//! predictor) feed it read-only inputs; consumers observe it through
//! queries and the advisory event stream.

pub mod advisor;
pub mod allocator;
pub mod conflict;
pub mod error;
pub mod events;
pub mod models;
pub mod persist;
pub mod service;
pub mod tasks;

// Re-export core types
pub use error::{Error, Result};
pub use models::{
    AddressSpace, Allocation, AllocationState, ConflictRecord, ForecastPoint,
    ForecastProvider, Resolution, ResolutionOutcome, ResolutionPolicy, Subnet,
    TelemetrySource, UtilizationSnapshot,
};
pub use advisor::{AdvisorConfig, CapacityAdvisor};
pub use allocator::{FreeBlock, FreeBlockIndex};
pub use events::{AdvisoryEvent, AdvisoryPublisher};
pub use persist::{PersistedSpace, PersistedState};
pub use service::{AddressManager, ManagerConfig, SpaceReport};
pub use tasks::{ForecastSweeper, ScanSweeper, SweeperHandle, TelemetrySweeper};
