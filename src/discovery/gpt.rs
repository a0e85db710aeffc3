//! GUID partition table parsing.
//!
//! Only the primary header at LBA 1 is consulted. Both the header and the
//! entry array are CRC32-checked before any entry is trusted.

use tracing::warn;

use crate::catalog::{PartitionEntry, PartitionFlags, PartitionType};
use crate::dal::{DiskHandle, RawDevice};

use super::table::TableError;

const SIGNATURE: &[u8; 8] = b"EFI PART";
const HEADER_LBA: u64 = 1;
const MIN_HEADER_SIZE: usize = 92;
const MIN_ENTRY_SIZE: usize = 128;
/// Entry arrays beyond this are treated as corrupt.
const MAX_ENTRY_ARRAY_BYTES: usize = 1024 * 1024;
const ATTR_LEGACY_BIOS_BOOTABLE: u64 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptHeader {
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub entries_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
    pub entries_crc: u32,
}

impl GptHeader {
    pub fn parse(sector: &[u8]) -> Result<Self, TableError> {
        if sector.len() < MIN_HEADER_SIZE || &sector[0..8] != SIGNATURE {
            return Err(TableError::InvalidGpt("missing EFI PART signature".to_string()));
        }

        let header_size = le_u32(sector, 12) as usize;
        if header_size < MIN_HEADER_SIZE || header_size > sector.len() {
            return Err(TableError::InvalidGpt(format!(
                "header size {} out of range",
                header_size
            )));
        }

        let stored_crc = le_u32(sector, 16);
        let mut header = sector[..header_size].to_vec();
        header[16..20].fill(0);
        if crc32fast::hash(&header) != stored_crc {
            return Err(TableError::InvalidGpt("header CRC mismatch".to_string()));
        }

        let parsed = Self {
            first_usable_lba: le_u64(sector, 40),
            last_usable_lba: le_u64(sector, 48),
            entries_lba: le_u64(sector, 72),
            entry_count: le_u32(sector, 80),
            entry_size: le_u32(sector, 84),
            entries_crc: le_u32(sector, 88),
        };

        let entry_size = parsed.entry_size as usize;
        if entry_size < MIN_ENTRY_SIZE || !entry_size.is_multiple_of(8) {
            return Err(TableError::InvalidGpt(format!(
                "entry size {} unsupported",
                entry_size
            )));
        }
        if parsed.entry_array_len().is_none_or(|len| len > MAX_ENTRY_ARRAY_BYTES) {
            return Err(TableError::InvalidGpt(format!(
                "{} entries of {} bytes exceed the entry array limit",
                parsed.entry_count, parsed.entry_size
            )));
        }

        Ok(parsed)
    }

    pub fn entry_array_len(&self) -> Option<usize> {
        (self.entry_count as usize).checked_mul(self.entry_size as usize)
    }
}

/// Reads the primary GPT and returns its used entries in array order.
pub fn read_gpt<D: RawDevice>(handle: &mut DiskHandle<D>) -> Result<Vec<PartitionEntry>, TableError> {
    let header = GptHeader::parse(&handle.read_sectors(HEADER_LBA, 1)?)?;

    let array_len = header.entry_array_len().unwrap_or(0);
    if array_len == 0 {
        return Ok(Vec::new());
    }

    let bytes_per_sector = handle.sector_size()? as usize;
    let sectors = array_len.div_ceil(bytes_per_sector) as u32;
    let array = handle.read_sectors(header.entries_lba, sectors)?;
    if array.len() < array_len {
        return Err(TableError::InvalidGpt("entry array truncated".to_string()));
    }

    let array = &array[..array_len];
    if crc32fast::hash(array) != header.entries_crc {
        return Err(TableError::InvalidGpt("entry array CRC mismatch".to_string()));
    }

    let usable = header.first_usable_lba..=header.last_usable_lba;
    Ok(parse_entries(array, header.entry_size as usize)
        .into_iter()
        .filter(|entry| {
            let last = entry.start_sector + entry.sector_count - 1;
            let inside = usable.contains(&entry.start_sector) && usable.contains(&last);
            if !inside {
                warn!(
                    start = entry.start_sector,
                    last,
                    "GPT entry outside the usable LBA range, skipped"
                );
            }
            inside
        })
        .collect())
}

/// Decodes used entries from a verified entry array.
pub fn parse_entries(array: &[u8], entry_size: usize) -> Vec<PartitionEntry> {
    array
        .chunks_exact(entry_size)
        .filter_map(|raw| {
            let mut type_guid = [0u8; 16];
            type_guid.copy_from_slice(&raw[0..16]);
            if type_guid == [0u8; 16] {
                return None;
            }

            let first = le_u64(raw, 32);
            let last = le_u64(raw, 40);
            if last < first {
                return None;
            }
            // the extent must end inside 64-bit sector addressing
            let Some(sector_count) = last.checked_add(1).map(|end| end - first) else {
                warn!(first, last, "GPT entry extent overflows, skipped");
                return None;
            };

            let attributes = le_u64(raw, 48);
            let flags = if attributes & ATTR_LEGACY_BIOS_BOOTABLE != 0 {
                PartitionFlags::BOOTABLE
            } else {
                PartitionFlags::NONE
            };

            Some(PartitionEntry {
                partition_type: PartitionType::Gpt(type_guid),
                flags,
                start_sector: first,
                sector_count,
            })
        })
        .collect()
}

#[inline]
fn le_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[inline]
fn le_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Builds a valid primary GPT (header at LBA 1, entries at LBA 2) in a
/// disk image. Used to build test fixtures.
#[cfg(test)]
pub(crate) fn write_test_gpt(image: &mut [u8], entries: &[([u8; 16], u64, u64, u64)]) {
    const ENTRY_COUNT: usize = 128;
    let mut array = vec![0u8; ENTRY_COUNT * MIN_ENTRY_SIZE];
    for (i, (type_guid, first, last, attributes)) in entries.iter().enumerate() {
        let raw = &mut array[i * MIN_ENTRY_SIZE..(i + 1) * MIN_ENTRY_SIZE];
        raw[0..16].copy_from_slice(type_guid);
        raw[16] = i as u8 + 1;
        raw[32..40].copy_from_slice(&first.to_le_bytes());
        raw[40..48].copy_from_slice(&last.to_le_bytes());
        raw[48..56].copy_from_slice(&attributes.to_le_bytes());
    }

    let mut header = [0u8; MIN_HEADER_SIZE];
    header[0..8].copy_from_slice(SIGNATURE);
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&(MIN_HEADER_SIZE as u32).to_le_bytes());
    header[24..32].copy_from_slice(&HEADER_LBA.to_le_bytes());
    header[40..48].copy_from_slice(&34u64.to_le_bytes());
    header[48..56].copy_from_slice(&((image.len() / 512) as u64 - 34).to_le_bytes());
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&(ENTRY_COUNT as u32).to_le_bytes());
    header[84..88].copy_from_slice(&(MIN_ENTRY_SIZE as u32).to_le_bytes());
    header[88..92].copy_from_slice(&crc32fast::hash(&array).to_le_bytes());
    let crc = crc32fast::hash(&header);
    header[16..20].copy_from_slice(&crc.to_le_bytes());

    image[512..512 + MIN_HEADER_SIZE].copy_from_slice(&header);
    image[1024..1024 + array.len()].copy_from_slice(&array);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dal::MemoryDevice;

    const LINUX_FS: [u8; 16] = [
        0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D,
        0xE4,
    ];

    /// 8192 sectors; usable LBAs are 34..=8158.
    fn image() -> Vec<u8> {
        vec![0u8; 8192 * 512]
    }

    #[test]
    fn test_reads_used_entries_in_order() {
        let mut data = image();
        write_test_gpt(
            &mut data,
            &[
                (LINUX_FS, 2048, 4095, 0),
                ([0u8; 16], 0, 0, 0),
                (LINUX_FS, 100, 199, ATTR_LEGACY_BIOS_BOOTABLE),
            ],
        );

        let mut handle = DiskHandle::from_device(MemoryDevice::new(data, 512));
        let entries = read_gpt(&mut handle).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].start_sector, 2048);
        assert_eq!(entries[0].sector_count, 2048);
        assert_eq!(entries[0].partition_type, PartitionType::Gpt(LINUX_FS));
        assert_eq!(entries[1].start_sector, 100);
        assert!(entries[1].flags.contains(PartitionFlags::BOOTABLE));
    }

    #[test]
    fn test_header_crc_mismatch_rejected() {
        let mut data = image();
        write_test_gpt(&mut data, &[(LINUX_FS, 34, 99, 0)]);
        data[512 + 40] ^= 0xFF;

        let mut handle = DiskHandle::from_device(MemoryDevice::new(data, 512));
        assert!(matches!(
            read_gpt(&mut handle),
            Err(TableError::InvalidGpt(msg)) if msg.contains("header CRC")
        ));
    }

    #[test]
    fn test_entry_crc_mismatch_rejected() {
        let mut data = image();
        write_test_gpt(&mut data, &[(LINUX_FS, 34, 99, 0)]);
        data[1024 + 33] ^= 0x01;

        let mut handle = DiskHandle::from_device(MemoryDevice::new(data, 512));
        assert!(matches!(
            read_gpt(&mut handle),
            Err(TableError::InvalidGpt(msg)) if msg.contains("entry array CRC")
        ));
    }

    #[test]
    fn test_full_range_entry_skipped() {
        let mut data = image();
        write_test_gpt(
            &mut data,
            &[(LINUX_FS, 0, u64::MAX, 0), (LINUX_FS, 40, 1000, 0)],
        );

        let mut handle = DiskHandle::from_device(MemoryDevice::new(data, 512));
        let entries = read_gpt(&mut handle).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_sector, 40);
        assert_eq!(entries[0].sector_count, 961);
    }

    #[test]
    fn test_overflowing_extent_never_yields_empty_count() {
        let mut array = vec![0u8; MIN_ENTRY_SIZE * 2];
        array[0..16].copy_from_slice(&LINUX_FS);
        array[40..48].copy_from_slice(&u64::MAX.to_le_bytes());
        array[MIN_ENTRY_SIZE..MIN_ENTRY_SIZE + 16].copy_from_slice(&LINUX_FS);
        array[MIN_ENTRY_SIZE + 32..MIN_ENTRY_SIZE + 40].copy_from_slice(&7u64.to_le_bytes());
        array[MIN_ENTRY_SIZE + 40..MIN_ENTRY_SIZE + 48].copy_from_slice(&u64::MAX.to_le_bytes());

        let entries = parse_entries(&array, MIN_ENTRY_SIZE);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_entry_outside_usable_range_skipped() {
        let mut data = image();
        write_test_gpt(
            &mut data,
            &[(LINUX_FS, 2, 33, 0), (LINUX_FS, 100, 9000, 0), (LINUX_FS, 34, 99, 0)],
        );

        let mut handle = DiskHandle::from_device(MemoryDevice::new(data, 512));
        let entries = read_gpt(&mut handle).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_sector, 34);
    }

    #[test]
    fn test_missing_signature() {
        let mut handle = DiskHandle::from_device(MemoryDevice::new(image(), 512));
        assert!(matches!(read_gpt(&mut handle), Err(TableError::InvalidGpt(_))));
    }
}
