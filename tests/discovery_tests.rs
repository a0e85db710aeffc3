//! Partition discovery over synthetic disk images.

use diskboard::dal::{AccessFlags, DeviceFile, DiskHandle, MemoryDevice};
use diskboard::discovery::{DeviceSource, DiscoveryOptions, PartitionDiscoveryService};
use diskboard::scan::{open_partition, scan_targets};
use diskboard::{DiskError, PartitionFlags, PartitionScheme, PartitionType, Result};
use rstest::*;
use std::fs;
use std::io;
use std::path::PathBuf;
use tempfile::TempDir;

const SECTOR: usize = 512;

/// Image files standing in for physical drives; `None` marks an absent index.
#[derive(Clone)]
struct ImageDrives {
    images: Vec<Option<PathBuf>>,
}

impl DeviceSource for ImageDrives {
    type Device = DeviceFile;

    fn open(&self, disk_index: u32, flags: AccessFlags) -> Result<DiskHandle<DeviceFile>> {
        match self.images.get(disk_index as usize).cloned().flatten() {
            Some(path) => Ok(DiskHandle::open_by_path(path, flags)?.with_disk_index(disk_index)),
            None => Err(DiskError::DeviceUnavailable {
                path: format!("image {}", disk_index),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }
}

/// In-memory drives; a sector size of zero makes geometry unavailable.
struct MemoryDrives {
    disks: Vec<(Vec<u8>, u32)>,
}

impl DeviceSource for MemoryDrives {
    type Device = MemoryDevice;

    fn open(&self, disk_index: u32, _flags: AccessFlags) -> Result<DiskHandle<MemoryDevice>> {
        let (data, bytes_per_sector) =
            self.disks
                .get(disk_index as usize)
                .ok_or_else(|| DiskError::DeviceUnavailable {
                    path: format!("memory {}", disk_index),
                    source: io::Error::from(io::ErrorKind::NotFound),
                })?;
        Ok(DiskHandle::from_device(MemoryDevice::new(data.clone(), *bytes_per_sector))
            .with_disk_index(disk_index))
    }
}

fn put_entry(image: &mut [u8], sector: usize, slot: usize, entry: (u8, u8, u32, u32)) {
    let (boot_flag, system_id, start_lba, sector_count) = entry;
    let base = sector * SECTOR;
    let o = base + 446 + slot * 16;
    image[o] = boot_flag;
    image[o + 4] = system_id;
    image[o + 8..o + 12].copy_from_slice(&start_lba.to_le_bytes());
    image[o + 12..o + 16].copy_from_slice(&sector_count.to_le_bytes());
    image[base + 510] = 0x55;
    image[base + 511] = 0xAA;
}

/// Two primaries and an extended container holding one logical partition.
fn mbr_image() -> Vec<u8> {
    let mut image = vec![0u8; 512 * SECTOR];
    put_entry(&mut image, 0, 0, (0x80, 0x07, 2, 100));
    put_entry(&mut image, 0, 1, (0x00, 0x0F, 200, 200));
    put_entry(&mut image, 0, 2, (0x00, 0x83, 400, 100));
    put_entry(&mut image, 200, 0, (0x00, 0x0B, 1, 50));
    image
}

#[fixture]
fn drives() -> (TempDir, ImageDrives) {
    let dir = TempDir::new().unwrap();

    let mbr = dir.path().join("mbr.img");
    fs::write(&mbr, mbr_image()).unwrap();

    let blank = dir.path().join("blank.img");
    fs::write(&blank, vec![0u8; 16 * SECTOR]).unwrap();

    let images = vec![Some(mbr), None, Some(blank), None];
    (dir, ImageDrives { images })
}

fn options() -> DiscoveryOptions {
    DiscoveryOptions::default()
        .with_max_disk_index(3)
        .with_access(AccessFlags::read_only().buffered())
}

#[rstest]
fn test_missing_indices_skipped_in_order(drives: (TempDir, ImageDrives)) {
    let (_dir, source) = drives;
    let catalog = PartitionDiscoveryService::with_source(source, options()).discover();

    let indices: Vec<u32> = catalog
        .disks()
        .map(|d| catalog.disk(d).unwrap().disk_index)
        .collect();
    assert_eq!(indices, vec![0, 2]);

    let blank = catalog.find_disk(2).unwrap();
    assert_eq!(catalog.disk(blank).unwrap().scheme, PartitionScheme::None);
    assert!(catalog.first_child(blank).is_none());
}

#[rstest]
fn test_mbr_partitions_in_table_order(drives: (TempDir, ImageDrives)) {
    let (_dir, source) = drives;
    let catalog = PartitionDiscoveryService::with_source(source, options()).discover();

    let disk = catalog.find_disk(0).unwrap();
    let entry = catalog.disk(disk).unwrap();
    assert_eq!(entry.scheme, PartitionScheme::Mbr);
    assert!(entry.path.as_deref().unwrap().ends_with("mbr.img"));

    let layout: Vec<(PartitionType, u64, PartitionFlags)> = catalog
        .partitions(disk)
        .map(|p| {
            let part = catalog.partition(p).unwrap();
            (part.partition_type, part.start_sector, part.flags)
        })
        .collect();
    assert_eq!(
        layout,
        vec![
            (PartitionType::Mbr(0x07), 2, PartitionFlags::BOOTABLE),
            (PartitionType::Mbr(0x0F), 200, PartitionFlags::EXTENDED),
            (PartitionType::Mbr(0x0B), 201, PartitionFlags::LOGICAL),
            (PartitionType::Mbr(0x83), 400, PartitionFlags::NONE),
        ]
    );

    for p in catalog.partitions(disk) {
        assert_eq!(catalog.parent(p), Some(disk));
        assert_eq!(catalog.disk_index(p), Some(0));
    }
}

#[rstest]
fn test_parallel_matches_sequential(drives: (TempDir, ImageDrives)) {
    let (_dir, source) = drives;
    let parallel = PartitionDiscoveryService::with_source(source.clone(), options());
    let parallel_json = serde_json::to_string(&parallel.discover().summary()).unwrap();

    let sequential = PartitionDiscoveryService::with_source(source, options().sequential());
    let sequential_json = serde_json::to_string(&sequential.discover().summary()).unwrap();

    assert_eq!(parallel_json, sequential_json);
}

#[rstest]
fn test_partition_window_reads_partition_start(drives: (TempDir, ImageDrives)) {
    let (_dir, source) = drives;
    let service = PartitionDiscoveryService::with_source(source, options());
    let catalog = service.discover();

    let disk = catalog.find_disk(0).unwrap();
    let targets = scan_targets(&catalog, Some(disk));
    assert_eq!(targets.len(), 4);

    // the extended container starts with its EBR
    let mut handle = open_partition(
        service.source(),
        &catalog,
        targets[1],
        AccessFlags::read_only().buffered(),
    )
    .unwrap();
    assert_eq!(handle.start_sector(), 200);
    let ebr = handle.read_sectors(0, 1).unwrap();
    assert_eq!(&ebr[510..], &[0x55, 0xAA]);
    assert!(matches!(
        handle.read_sectors(200, 1),
        Err(DiskError::BoundaryViolation { .. })
    ));
}

#[test]
fn test_unreadable_table_still_listed() {
    let source = MemoryDrives {
        disks: vec![(mbr_image(), 512), (vec![0u8; 8 * SECTOR], 0)],
    };
    let options = DiscoveryOptions::default().with_max_disk_index(5).sequential();
    let catalog = PartitionDiscoveryService::with_source(source, options).discover();

    assert_eq!(catalog.disk_count(), 2);
    let broken = catalog.find_disk(1).unwrap();
    let entry = catalog.disk(broken).unwrap();
    assert_eq!(entry.scheme, PartitionScheme::Unreadable);
    assert!(entry.geometry.is_none());
    assert_eq!(catalog.partitions(broken).count(), 0);
}

#[test]
fn test_no_drives_gives_empty_catalog() {
    let source = MemoryDrives { disks: Vec::new() };
    let catalog = PartitionDiscoveryService::with_source(source, DiscoveryOptions::default())
        .discover();
    assert!(catalog.is_empty());
    assert!(catalog.first_disk().is_none());
}
