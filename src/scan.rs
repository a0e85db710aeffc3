//! Contract between the catalog and a filesystem scanner.
//!
//! A scan engine is handed the catalog plus an optional starting node and
//! reports a flattened [`Status`]. The helpers here resolve which partitions
//! a request covers and open a window scoped to one of them.

use crate::catalog::{NodeId, NodeKind, PartitionCatalog};
use crate::dal::{AccessFlags, DiskHandle, Window};
use crate::discovery::DeviceSource;
use crate::error::{DiskError, Result};
use crate::status::Status;

pub type ScanStatus = Status;

pub trait FileSystemScanEngine {
    /// Scans every partition under `root`, or the whole catalog when `root`
    /// is `None`.
    fn scan(&mut self, catalog: &PartitionCatalog, root: Option<NodeId>) -> ScanStatus;
}

/// Partition nodes a scan rooted at `root` should visit, in catalog order.
///
/// A disk node expands to its partitions; a partition node is returned as
/// is. Unknown nodes yield nothing.
pub fn scan_targets(catalog: &PartitionCatalog, root: Option<NodeId>) -> Vec<NodeId> {
    match root {
        None => catalog
            .disks()
            .flat_map(|disk| catalog.partitions(disk))
            .collect(),
        Some(node) => match catalog.node(node) {
            Some(NodeKind::Disk(_)) => catalog.partitions(node).collect(),
            Some(NodeKind::Partition(_)) => vec![node],
            None => Vec::new(),
        },
    }
}

/// Opens a handle windowed to the extent of partition `node`.
pub fn open_partition<S: DeviceSource>(
    source: &S,
    catalog: &PartitionCatalog,
    node: NodeId,
    flags: AccessFlags,
) -> Result<DiskHandle<S::Device>> {
    let entry = catalog.partition(node).ok_or_else(|| {
        DiskError::ParameterInvalid(format!("node {:?} is not a partition", node))
    })?;
    let disk_index = catalog
        .disk_index(node)
        .ok_or_else(|| DiskError::ParameterInvalid(format!("node {:?} has no disk", node)))?;

    source.open_window(
        disk_index,
        Window::new(entry.start_sector, entry.sector_count),
        flags,
    )
}
