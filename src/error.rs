//! Error types for the allocation engine

use std::net::Ipv4Addr;
use thiserror::Error;
use uuid::Uuid;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Allocation engine errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Capacity errors
    #[error("no free /{prefix_len} block available in address space {space_id}")]
    CapacityExhausted { space_id: Uuid, prefix_len: u8 },

    #[error("no free host address in subnet {0}")]
    HostsExhausted(Uuid),

    #[error("address {0} is already in use")]
    AddressInUse(Ipv4Addr),

    #[error("conflict {0} cannot be repaired: no free address in the loser's subnet")]
    ResolutionExhausted(Uuid),

    // Request validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Lookup errors
    #[error("address space not found: {0}")]
    AddressSpaceNotFound(Uuid),

    #[error("subnet not found: {0}")]
    SubnetNotFound(Uuid),

    #[error("allocation not found: {0}")]
    AllocationNotFound(Uuid),

    #[error("conflict record not found: {0}")]
    ConflictNotFound(Uuid),

    // Lifecycle errors
    #[error("subnet {0} still holds {1} live allocations")]
    SubnetNotEmpty(Uuid, usize),

    // CLI/persistence seam
    #[error("i/o error: {0}")]
    Io(String),

    #[error("persistence error: {0}")]
    Persist(String),
}

impl Error {
    /// Distinguishable process exit code per failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CapacityExhausted { .. } | Error::HostsExhausted(_) => 2,
            Error::AddressInUse(_) => 3,
            Error::ResolutionExhausted(_) => 4,
            Error::InvalidRequest(_) => 5,
            Error::AddressSpaceNotFound(_)
            | Error::SubnetNotFound(_)
            | Error::AllocationNotFound(_)
            | Error::ConflictNotFound(_) => 6,
            Error::SubnetNotEmpty(_, _) => 7,
            Error::Io(_) | Error::Persist(_) => 1,
        }
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidRequest(e.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::InvalidRequest(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persist(e.to_string())
    }
}
