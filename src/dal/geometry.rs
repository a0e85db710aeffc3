use serde::Serialize;

use crate::error::{DiskError, Result};

const SYNTH_TRACKS_PER_CYLINDER: u32 = 255;
const SYNTH_SECTORS_PER_TRACK: u32 = 63;

/// Physical layout of a device as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub cylinders: u64,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

impl Geometry {
    pub fn new(
        cylinders: u64,
        tracks_per_cylinder: u32,
        sectors_per_track: u32,
        bytes_per_sector: u32,
    ) -> Self {
        Self {
            cylinders,
            tracks_per_cylinder,
            sectors_per_track,
            bytes_per_sector,
        }
    }

    /// Builds a CHS description for a device that only reports its capacity.
    ///
    /// Uses the 255 heads / 63 sectors translation; the trailing partial
    /// cylinder is not addressable through the geometry, matching what the
    /// Windows drive-geometry query reports. Devices smaller than a single
    /// translated cylinder are described one sector per cylinder.
    pub fn from_capacity(capacity_bytes: u64, bytes_per_sector: u32) -> Result<Self> {
        if bytes_per_sector == 0 {
            return Err(DiskError::GeometryQueryFailed);
        }

        let sectors = capacity_bytes / bytes_per_sector as u64;
        let per_cylinder = SYNTH_TRACKS_PER_CYLINDER as u64 * SYNTH_SECTORS_PER_TRACK as u64;

        if sectors < per_cylinder {
            return Ok(Self::new(sectors, 1, 1, bytes_per_sector));
        }

        Ok(Self::new(
            sectors / per_cylinder,
            SYNTH_TRACKS_PER_CYLINDER,
            SYNTH_SECTORS_PER_TRACK,
            bytes_per_sector,
        ))
    }

    /// Cylinders × tracks × sectors, rejected when it does not fit in 32 bits.
    pub fn total_sectors(&self) -> Result<u32> {
        let product = (self.cylinders as u128)
            * (self.tracks_per_cylinder as u128)
            * (self.sectors_per_track as u128);

        u32::try_from(product)
            .map_err(|_| DiskError::SectorCountOverflow(product.min(u64::MAX as u128) as u64))
    }

    #[inline]
    pub fn total_bytes(&self) -> Option<u64> {
        self.cylinders
            .checked_mul(self.tracks_per_cylinder as u64)?
            .checked_mul(self.sectors_per_track as u64)?
            .checked_mul(self.bytes_per_sector as u64)
    }
}

/// Sub-range of a device's absolute sectors that a handle may address.
///
/// A `sector_count` of zero leaves the window open to the end of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start_sector: u64,
    pub sector_count: u64,
}

impl Window {
    pub const UNBOUNDED: Window = Window {
        start_sector: 0,
        sector_count: 0,
    };

    pub fn new(start_sector: u64, sector_count: u64) -> Self {
        Self {
            start_sector,
            sector_count,
        }
    }

    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.sector_count != 0
    }

    /// True when `sectors` more sectors fit after relative `position`.
    pub fn admits(&self, position: u64, sectors: u64) -> bool {
        if !self.is_bounded() {
            return true;
        }
        match position.checked_add(sectors) {
            Some(end) => end <= self.sector_count,
            None => false,
        }
    }
}
