//! Disk access layer: read-only, sector-addressed device I/O.

mod aligned_buffer;
mod device;
mod file_device;
mod geometry;
mod handle;
pub mod naming;

pub use aligned_buffer::{AlignedBuffer, IO_ALIGNMENT};
pub use device::{AccessFlags, MemoryDevice, RawDevice};
pub use file_device::{DEFAULT_SECTOR_SIZE, DeviceFile};
pub use geometry::{Geometry, Window};
pub use handle::{DeviceAddress, DiskHandle};

/// Highest physical drive index this layer will address.
pub const MAX_DISK_INDEX: u32 = 15;
