use thiserror::Error;
use tracing::warn;

use super::{gpt, mbr};
use crate::catalog::{PartitionEntry, PartitionScheme};
use crate::dal::{DiskHandle, RawDevice};
use crate::error::DiskError;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Failed to read partition table: {0}")]
    Read(#[from] DiskError),

    #[error("Invalid GPT: {0}")]
    InvalidGpt(String),
}

/// Partitions found on one disk, in on-disk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    pub scheme: PartitionScheme,
    pub entries: Vec<PartitionEntry>,
}

/// Reads and classifies the partition table of an unwindowed disk handle.
///
/// A protective MBR leads to the GPT; a GPT that fails validation falls back
/// to whatever the MBR itself describes. A disk with no boot record yields an
/// empty table with scheme `None`.
pub fn read_partition_table<D: RawDevice>(
    handle: &mut DiskHandle<D>,
) -> Result<PartitionTable, TableError> {
    let boot_sector = handle.read_sectors(0, 1)?;

    let Some(records) = mbr::parse_boot_record(&boot_sector) else {
        return Ok(PartitionTable::default());
    };

    if records.iter().any(|r| r.system_id == mbr::GPT_PROTECTIVE) {
        match gpt::read_gpt(handle) {
            Ok(entries) => {
                return Ok(PartitionTable {
                    scheme: PartitionScheme::Gpt,
                    entries,
                });
            }
            Err(e) => {
                warn!(
                    device = %handle.describe(),
                    error = %e,
                    "GPT unusable, falling back to protective MBR"
                );
            }
        }
    }

    Ok(PartitionTable {
        scheme: PartitionScheme::Mbr,
        entries: mbr::resolve_primary(handle, &records),
    })
}
