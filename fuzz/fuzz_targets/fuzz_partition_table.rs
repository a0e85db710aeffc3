#![no_main]

use diskboard::dal::{DiskHandle, MemoryDevice};
use diskboard::discovery::read_partition_table;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut handle = DiskHandle::from_device(MemoryDevice::new(data.to_vec(), 512));
    if let Ok(table) = read_partition_table(&mut handle) {
        for entry in &table.entries {
            assert!(entry.sector_count > 0, "empty extent: {:?}", entry);
            assert!(
                entry.start_sector.checked_add(entry.sector_count).is_some(),
                "extent overflows: {:?}",
                entry
            );
        }
    }
});
