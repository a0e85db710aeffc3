//! Catalog of discovered disks and their partitions.
//!
//! Nodes live in an arena and link to each other by [`NodeId`], so the tree
//! can be walked repeatedly without borrowing gymnastics. Disks form the root
//! level; each disk owns its partitions in partition-table order.

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::BitOr;

use crate::dal::Geometry;
use crate::dal::naming::DriveInfo;
use crate::error::{DiskError, Result};

/// Stable handle to a node inside one [`PartitionCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// On-disk partition type, surfaced verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionType {
    /// MBR/EBR system id byte.
    Mbr(u8),
    /// GPT partition type GUID in its on-disk byte order.
    Gpt([u8; 16]),
}

impl PartitionType {
    pub fn mbr_id(&self) -> Option<u8> {
        match self {
            PartitionType::Mbr(id) => Some(*id),
            PartitionType::Gpt(_) => None,
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionType::Mbr(id) => write!(f, "0x{:02x}", id),
            PartitionType::Gpt(g) => write!(
                f,
                "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                g[3], g[2], g[1], g[0], g[5], g[4], g[7], g[6],
                g[8], g[9], g[10], g[11], g[12], g[13], g[14], g[15]
            ),
        }
    }
}

impl Serialize for PartitionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Bit set describing how a partition was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PartitionFlags(u32);

impl PartitionFlags {
    pub const NONE: PartitionFlags = PartitionFlags(0);
    /// MBR active flag (0x80) was set.
    pub const BOOTABLE: PartitionFlags = PartitionFlags(1 << 0);
    /// Entry is an extended container holding logical partitions.
    pub const EXTENDED: PartitionFlags = PartitionFlags(1 << 1);
    /// Entry came from an EBR chain inside an extended container.
    pub const LOGICAL: PartitionFlags = PartitionFlags(1 << 2);

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: PartitionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PartitionFlags {
    type Output = PartitionFlags;

    fn bitor(self, rhs: PartitionFlags) -> PartitionFlags {
        PartitionFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for PartitionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (PartitionFlags::BOOTABLE, "bootable"),
            (PartitionFlags::EXTENDED, "extended"),
            (PartitionFlags::LOGICAL, "logical"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();

        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

/// Partitioning scheme found on a disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionScheme {
    /// No recognisable table (blank disk or a bare filesystem).
    #[default]
    None,
    Mbr,
    Gpt,
    /// The device opened but its table sectors could not be read.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskEntry {
    pub disk_index: u32,
    pub path: Option<String>,
    pub geometry: Option<Geometry>,
    pub drive: Option<DriveInfo>,
    pub scheme: PartitionScheme,
}

impl DiskEntry {
    pub fn new(disk_index: u32) -> Self {
        Self {
            disk_index,
            path: None,
            geometry: None,
            drive: None,
            scheme: PartitionScheme::None,
        }
    }
}

/// A partition as described by its table entry, in absolute device sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub partition_type: PartitionType,
    pub flags: PartitionFlags,
    pub start_sector: u64,
    pub sector_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Disk(DiskEntry),
    Partition(PartitionEntry),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            parent,
            first_child: None,
            last_child: None,
            next_sibling: None,
        }
    }
}

/// Owned tree of disks and partitions.
///
/// Appended to only while discovery runs; replaced as a whole on rebuild.
#[derive(Debug, Clone, Default)]
pub struct PartitionCatalog {
    nodes: Vec<Node>,
    first_disk: Option<NodeId>,
    last_disk: Option<NodeId>,
}

impl PartitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_disk(&mut self, disk_index: u32) -> NodeId {
        self.append_disk_with(DiskEntry::new(disk_index))
    }

    /// Appends a disk after every disk already in the catalog.
    pub fn append_disk_with(&mut self, entry: DiskEntry) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(NodeKind::Disk(entry), None));

        match self.last_disk {
            Some(last) => self.nodes[last.0].next_sibling = Some(id),
            None => self.first_disk = Some(id),
        }
        self.last_disk = Some(id);
        id
    }

    /// Appends a partition as the last child of `disk`.
    pub fn append_partition(&mut self, disk: NodeId, entry: PartitionEntry) -> Result<NodeId> {
        let is_disk = self.is_disk(disk);
        debug_assert!(is_disk, "partition parent {:?} is not a disk node", disk);
        if !is_disk {
            return Err(DiskError::ParameterInvalid(format!(
                "node {:?} is not a disk",
                disk
            )));
        }

        let id = NodeId(self.nodes.len());
        self.nodes
            .push(Node::new(NodeKind::Partition(entry), Some(disk)));

        let parent = &mut self.nodes[disk.0];
        let previous = parent.last_child.replace(id);
        if parent.first_child.is_none() {
            parent.first_child = Some(id);
        }
        if let Some(previous) = previous {
            self.nodes[previous.0].next_sibling = Some(id);
        }

        Ok(id)
    }

    #[inline]
    pub fn first_disk(&self) -> Option<NodeId> {
        self.first_disk
    }

    #[inline]
    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.next_sibling
    }

    /// First partition of a disk node; `None` for partitions.
    #[inline]
    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.first_child
    }

    #[inline]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0).map(|n| &n.kind)
    }

    pub fn is_disk(&self, node: NodeId) -> bool {
        matches!(self.node(node), Some(NodeKind::Disk(_)))
    }

    pub fn disk(&self, node: NodeId) -> Option<&DiskEntry> {
        match self.node(node)? {
            NodeKind::Disk(entry) => Some(entry),
            NodeKind::Partition(_) => None,
        }
    }

    pub fn partition(&self, node: NodeId) -> Option<&PartitionEntry> {
        match self.node(node)? {
            NodeKind::Partition(entry) => Some(entry),
            NodeKind::Disk(_) => None,
        }
    }

    /// Disk index of a disk node, or of the disk owning a partition node.
    pub fn disk_index(&self, node: NodeId) -> Option<u32> {
        match self.node(node)? {
            NodeKind::Disk(entry) => Some(entry.disk_index),
            NodeKind::Partition(_) => self.disk_index(self.parent(node)?),
        }
    }

    pub fn partition_type(&self, node: NodeId) -> Option<PartitionType> {
        self.partition(node).map(|p| p.partition_type)
    }

    pub fn disks(&self) -> Siblings<'_> {
        Siblings {
            catalog: self,
            next: self.first_disk,
        }
    }

    pub fn partitions(&self, disk: NodeId) -> Siblings<'_> {
        Siblings {
            catalog: self,
            next: self.first_child(disk),
        }
    }

    pub fn find_disk(&self, disk_index: u32) -> Option<NodeId> {
        self.disks()
            .find(|&id| self.disk(id).is_some_and(|d| d.disk_index == disk_index))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn disk_count(&self) -> usize {
        self.disks().count()
    }

    /// Owned, serialisable copy of the tree.
    pub fn summary(&self) -> CatalogSummary {
        let disks = self
            .disks()
            .filter_map(|id| {
                let disk = self.disk(id)?.clone();
                let partitions = self
                    .partitions(id)
                    .filter_map(|p| self.partition(p).copied())
                    .collect();
                Some(DiskSummary { disk, partitions })
            })
            .collect();
        CatalogSummary { disks }
    }
}

/// Iterator over a run of sibling nodes.
pub struct Siblings<'a> {
    catalog: &'a PartitionCatalog,
    next: Option<NodeId>,
}

impl Iterator for Siblings<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.catalog.next_sibling(current);
        Some(current)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub disks: Vec<DiskSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskSummary {
    #[serde(flatten)]
    pub disk: DiskEntry,
    pub partitions: Vec<PartitionEntry>,
}
