//! MBR and EBR-chain parsing.

use std::collections::HashSet;
use tracing::warn;

use crate::catalog::{PartitionEntry, PartitionFlags, PartitionType};
use crate::dal::{DiskHandle, RawDevice};

pub const MBR_SIZE: usize = 512;
const ENTRY_TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const ACTIVE_FLAG: u8 = 0x80;

pub const GPT_PROTECTIVE: u8 = 0xEE;

/// Upper bound on EBR links followed inside one extended container.
pub const MAX_EBR_LINKS: usize = 128;

/// One 16-byte slot of an MBR or EBR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrRecord {
    pub boot_flag: u8,
    pub system_id: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl MbrRecord {
    fn read(sector: &[u8], slot: usize) -> Self {
        let o = ENTRY_TABLE_OFFSET + slot * ENTRY_SIZE;
        Self {
            boot_flag: sector[o],
            system_id: sector[o + 4],
            start_lba: u32::from_le_bytes([sector[o + 8], sector[o + 9], sector[o + 10], sector[o + 11]]),
            sector_count: u32::from_le_bytes([
                sector[o + 12],
                sector[o + 13],
                sector[o + 14],
                sector[o + 15],
            ]),
        }
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.system_id != 0 && self.sector_count != 0
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        is_extended_type(self.system_id)
    }

    fn flags(&self) -> PartitionFlags {
        if self.boot_flag == ACTIVE_FLAG {
            PartitionFlags::BOOTABLE
        } else {
            PartitionFlags::NONE
        }
    }
}

/// CHS extended, LBA extended, and Linux extended containers.
#[inline]
pub fn is_extended_type(system_id: u8) -> bool {
    matches!(system_id, 0x05 | 0x0F | 0x85)
}

/// Decodes the four slots of a boot record.
///
/// Returns `None` when the sector lacks the `55 AA` signature or when a slot
/// carries a status byte other than `0x00`/`0x80`, which is what a bare
/// filesystem boot sector (VBR) looks like.
pub fn parse_boot_record(sector: &[u8]) -> Option<[MbrRecord; 4]> {
    if sector.len() < MBR_SIZE || sector[510..512] != BOOT_SIGNATURE {
        return None;
    }

    let records = [0, 1, 2, 3].map(|slot| MbrRecord::read(sector, slot));
    if records
        .iter()
        .any(|r| r.boot_flag != 0 && r.boot_flag != ACTIVE_FLAG)
    {
        return None;
    }
    Some(records)
}

/// Expands primary records into catalog entries, in table order, resolving
/// each extended container into the logical partitions that follow it.
pub fn resolve_primary<D: RawDevice>(
    handle: &mut DiskHandle<D>,
    records: &[MbrRecord; 4],
) -> Vec<PartitionEntry> {
    let mut entries = Vec::new();

    for record in records.iter().filter(|r| r.is_used()) {
        let start = record.start_lba as u64;
        let count = record.sector_count as u64;

        if record.is_extended() {
            entries.push(PartitionEntry {
                partition_type: PartitionType::Mbr(record.system_id),
                flags: record.flags() | PartitionFlags::EXTENDED,
                start_sector: start,
                sector_count: count,
            });
            walk_ebr_chain(handle, start, count, &mut entries);
        } else {
            entries.push(PartitionEntry {
                partition_type: PartitionType::Mbr(record.system_id),
                flags: record.flags(),
                start_sector: start,
                sector_count: count,
            });
        }
    }

    entries
}

/// Follows the EBR linked list inside an extended container.
///
/// Logical partition starts are relative to their own EBR; links to the next
/// EBR are relative to the container start. Stops quietly at the end of the
/// chain and with a warning on loops, escapes, or unreadable links.
fn walk_ebr_chain<D: RawDevice>(
    handle: &mut DiskHandle<D>,
    container_start: u64,
    container_len: u64,
    out: &mut Vec<PartitionEntry>,
) {
    let container_end = container_start.saturating_add(container_len);
    let mut visited = HashSet::new();
    let mut ebr = container_start;

    for _ in 0..MAX_EBR_LINKS {
        if !visited.insert(ebr) {
            warn!(ebr, "EBR chain loops back on itself");
            return;
        }

        let sector = match handle.read_sectors(ebr, 1) {
            Ok(sector) => sector,
            Err(e) => {
                warn!(ebr, error = %e, "Failed to read EBR");
                return;
            }
        };

        let Some(records) = parse_boot_record(&sector) else {
            warn!(ebr, "EBR lacks a valid boot record signature");
            return;
        };

        let logical = records[0];
        if logical.is_used() {
            out.push(PartitionEntry {
                partition_type: PartitionType::Mbr(logical.system_id),
                flags: logical.flags() | PartitionFlags::LOGICAL,
                start_sector: ebr + logical.start_lba as u64,
                sector_count: logical.sector_count as u64,
            });
        }

        let link = records[1];
        if !link.is_used() || !link.is_extended() {
            return;
        }

        let next = container_start + link.start_lba as u64;
        if next <= container_start || next >= container_end {
            warn!(ebr, next, "EBR link points outside its extended container");
            return;
        }
        ebr = next;
    }

    warn!(container_start, "EBR chain exceeds {} links, truncated", MAX_EBR_LINKS);
}

/// Writes one slot into a boot-record image. Used to build test fixtures.
#[cfg(test)]
pub(crate) fn put_record(sector: &mut [u8], slot: usize, record: MbrRecord) {
    let o = ENTRY_TABLE_OFFSET + slot * ENTRY_SIZE;
    sector[o] = record.boot_flag;
    sector[o + 4] = record.system_id;
    sector[o + 8..o + 12].copy_from_slice(&record.start_lba.to_le_bytes());
    sector[o + 12..o + 16].copy_from_slice(&record.sector_count.to_le_bytes());
    sector[510] = 0x55;
    sector[511] = 0xAA;
}
