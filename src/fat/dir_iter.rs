use std::collections::HashSet;
use std::ops::Range;

use thiserror::Error;

use crate::fat::{ChainError, ClusterIdx, FatDentry, FatPartition, DENTRY_SIZE};

/// Walks deeper than this are reported instead of entered unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// The byte offset of a directory slot within the volume image.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotLocation(usize);

impl SlotLocation {
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> usize {
        self.0
    }

    pub fn byte_range(self) -> Range<usize> {
        self.0..self.0 + DENTRY_SIZE
    }
}

/// Where a directory's slots are stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DirLocation {
    /// The fixed region between the allocation tables and the data region.
    Root,
    /// A chain of data clusters starting at the given cluster.
    Cluster(ClusterIdx),
}

/// The slots of one directory, see `FatPartition::dir_slots`.
#[derive(Debug, Clone)]
pub struct DirSlots {
    pub slots: Vec<SlotLocation>,
    /// The clusters holding `slots`, empty for the root directory.
    pub clusters: Vec<ClusterIdx>,
    pub error: Option<ChainError>,
}

/// A live dentry found during a walk.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub slot: SlotLocation,
    pub dentry: FatDentry,
    /// Slash-separated path from the root, e.g. `/DOCS/README.TXT`.
    pub path: String,
    /// The directory holding this entry could not be read completely, so its slots may be garbage.
    pub in_broken_directory: bool,
}

/// Problems that keep the walker from descending into a directory, or from reading all of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error("directory {path} is truncated: {source}")]
    BrokenDirectory { path: String, source: ChainError },
    #[error("directory {path} starts at cluster {cluster}, which is not a data cluster")]
    InvalidDirectory { path: String, cluster: ClusterIdx },
    #[error("directory {path} at cluster {cluster} was already visited, skipping the cycle")]
    DirectoryCycle { path: String, cluster: ClusterIdx },
    #[error("directory {path} is nested deeper than {max_depth} levels, skipping it")]
    TooDeep { path: String, max_depth: usize },
}

/// Callbacks for the entries a `TreeWalker` visits. The walker descends into directories by itself.
pub trait TreeVisitor {
    /// Called once for every cluster that stores the slots of a visited directory.
    fn directory_cluster(&mut self, _cluster: ClusterIdx) {}

    fn volume_label(&mut self, _partition: &mut FatPartition, _entry: &DirEntry) {}

    /// Called before the walker descends into the directory.
    fn directory(&mut self, _partition: &mut FatPartition, _entry: &DirEntry) {}

    fn file(&mut self, partition: &mut FatPartition, entry: &DirEntry);

    fn walk_error(&mut self, error: WalkError);
}

struct DirFrame {
    path: String,
    slots: Vec<SlotLocation>,
    next_slot: usize,
    broken: bool,
}

/// Visits every live dentry reachable from the root directory in pre-order, i.e. a directory's content is visited
/// right after the directory's own dentry. The traversal state is kept on an explicit stack, and every directory is
/// entered at most once. The root's entries are at level 1; directories at a deeper level than `max_depth` are not
/// entered.
pub struct TreeWalker {
    max_depth: usize,
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl TreeWalker {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn walk<V: TreeVisitor>(&self, partition: &mut FatPartition, visitor: &mut V) {
        let mut visited_dirs = HashSet::new();
        visited_dirs.insert(DirLocation::Root);
        let mut stack = vec![Self::open_dir(partition, visitor, DirLocation::Root, String::new())];

        while let Some(frame) = stack.last_mut() {
            let slot = match frame.slots.get(frame.next_slot) {
                Some(&slot) => slot,
                None => {
                    stack.pop();
                    continue;
                }
            };
            frame.next_slot += 1;

            let dentry = partition.dentry(slot);
            if dentry.is_dir_table_end() {
                stack.pop();
                continue;
            }
            if dentry.is_deleted() || dentry.is_dot_dir() {
                continue;
            }

            let entry = DirEntry {
                slot,
                dentry,
                path: format!("{}/{}", frame.path, dentry.file_name()),
                in_broken_directory: frame.broken,
            };
            if dentry.is_volume_label() {
                visitor.volume_label(partition, &entry);
            } else if dentry.is_file() {
                visitor.file(partition, &entry);
            } else {
                visitor.directory(partition, &entry);
                let cluster = dentry.first_cluster;
                let location = DirLocation::Cluster(cluster);
                if !partition.is_data_cluster(cluster) {
                    visitor.walk_error(WalkError::InvalidDirectory { path: entry.path, cluster });
                } else if stack.len() > self.max_depth {
                    visitor.walk_error(WalkError::TooDeep { path: entry.path, max_depth: self.max_depth });
                } else if !visited_dirs.insert(location) {
                    visitor.walk_error(WalkError::DirectoryCycle { path: entry.path, cluster });
                } else {
                    stack.push(Self::open_dir(partition, visitor, location, entry.path));
                }
            }
        }
    }

    fn open_dir<V: TreeVisitor>(
        partition: &FatPartition,
        visitor: &mut V,
        location: DirLocation,
        path: String,
    ) -> DirFrame {
        let dir_slots = partition.dir_slots(location);
        for &cluster in &dir_slots.clusters {
            visitor.directory_cluster(cluster);
        }
        let broken = dir_slots.error.is_some();
        if let Some(source) = dir_slots.error {
            visitor.walk_error(WalkError::BrokenDirectory { path: path.clone(), source });
        }
        DirFrame { path, slots: dir_slots.slots, next_slot: 0, broken }
    }
}
