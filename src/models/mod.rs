//! Entity records for the allocation engine
//!
//! All entities are plain serializable records with no embedded behavior
//! beyond derived accessors, so persistence technology stays swappable.

mod address_space;
mod allocation;
mod conflict;
mod telemetry;

pub use address_space::AddressSpace;
pub use allocation::{Allocation, AllocationState, Subnet};
pub use conflict::{ConflictRecord, Resolution, ResolutionOutcome, ResolutionPolicy};
pub use telemetry::{ForecastPoint, ForecastProvider, TelemetrySource, UtilizationSnapshot};
