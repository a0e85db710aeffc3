use std::io;
use thiserror::Error;

use crate::dal::Window;

/// Errors raised by the disk access layer and the catalog.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("Invalid parameter: {0}")]
    ParameterInvalid(String),

    #[error("Device {path} unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Device geometry could not be resolved")]
    GeometryQueryFailed,

    #[error(
        "Read of {requested} sectors at position {position} crosses window of {} sectors",
        window.sector_count
    )]
    BoundaryViolation {
        position: u64,
        requested: u64,
        window: Window,
    },

    #[error("Window start not reachable: expected byte offset {expected}, landed at {actual}")]
    WindowMisaligned { expected: u64, actual: u64 },

    #[error("Operation not supported on a read-only device: {0}")]
    NotSupported(&'static str),

    #[error("Total sector count {0} does not fit in 32 bits")]
    SectorCountOverflow(u64),

    #[error("Disk handle is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DiskError>;
