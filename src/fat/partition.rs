use std::collections::HashSet;
use std::ops::Range;

use anyhow::Result;

use crate::fat::{
    write_packed_entry, BootSector, ChainError, ClusterIdx, DirLocation, DirSlots, FatDentry, FatEntry, FatTable,
    SlotLocation, DENTRY_SIZE, FIRST_DATA_CLUSTER,
};

/// A FAT12 volume consists of 4 regions: the reserved sectors (which include the boot sector), the allocation tables,
/// the fixed-size root directory and the data region. `FatPartition` borrows the whole image and hands out checked
/// accessors for each of them.
pub struct FatPartition<'a> {
    image: &'a mut [u8],
    boot_sector: BootSector,
}

impl<'a> FatPartition<'a> {
    /// Fails if `image` does not start with a valid FAT12 boot sector or is shorter than the volume it describes.
    pub fn new(image: &'a mut [u8]) -> Result<Self> {
        let boot_sector = BootSector::parse(image)?;
        Ok(Self { image, boot_sector })
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    /// in bytes
    pub fn cluster_size(&self) -> u32 {
        self.boot_sector.cluster_size()
    }

    /// One past the highest valid cluster index.
    pub fn cluster_end(&self) -> ClusterIdx {
        self.boot_sector.cluster_end()
    }

    pub fn is_data_cluster(&self, idx: ClusterIdx) -> bool {
        (FIRST_DATA_CLUSTER..self.cluster_end()).contains(&idx)
    }

    pub fn fat_table(&self) -> FatTable<'_> {
        FatTable::new(&self.image[self.boot_sector.fat_table_range()], self.cluster_end())
    }

    /// PANICS: Panics if `idx` is not below `cluster_end()`.
    pub fn fat_entry(&self, idx: ClusterIdx) -> FatEntry {
        self.fat_table().get(idx)
    }

    /// Writes `entry` into every copy of the allocation table.
    /// PANICS: Panics if `idx` is not below `cluster_end()`.
    pub fn set_fat_entry(&mut self, idx: ClusterIdx, entry: FatEntry) {
        assert!(idx < self.cluster_end());
        for copy_idx in 0..self.boot_sector.fat_count {
            let range = self.boot_sector.fat_range(copy_idx);
            write_packed_entry(&mut self.image[range], idx, entry);
        }
    }

    /// Returns the range in bytes of a data cluster, relative to the volume start
    /// PANICS: Panics if `idx` is not a data cluster.
    pub fn cluster_range(&self, idx: ClusterIdx) -> Range<usize> {
        assert!(self.is_data_cluster(idx));
        let cluster_size = self.cluster_size() as usize;
        let start = self.boot_sector.first_data_byte() + usize::from(idx - FIRST_DATA_CLUSTER) * cluster_size;
        start..start + cluster_size
    }

    pub fn dentry(&self, slot: SlotLocation) -> FatDentry {
        FatDentry::from_bytes(&self.image[slot.byte_range()])
    }

    pub fn set_dentry(&mut self, slot: SlotLocation, dentry: &FatDentry) {
        self.image[slot.byte_range()].copy_from_slice(&dentry.to_bytes());
    }

    /// Lists the slots of a directory in on-disk order. The root directory is a fixed region; any other directory
    /// consists of the clusters of its chain. If the chain is broken or loops, the slots of its intact prefix are
    /// returned together with the error.
    pub fn dir_slots(&self, dir: DirLocation) -> DirSlots {
        match dir {
            DirLocation::Root => {
                let slots = self.boot_sector.root_dir_range().step_by(DENTRY_SIZE).map(SlotLocation::new).collect();
                DirSlots { slots, clusters: Vec::new(), error: None }
            }
            DirLocation::Cluster(first_cluster) => {
                let mut seen = HashSet::new();
                let mut clusters = Vec::new();
                let mut error = None;
                for item in self.fat_table().chain_iter(first_cluster) {
                    match item {
                        Ok(cluster) if !seen.insert(cluster) => {
                            error = Some(ChainError::Cycle { start: first_cluster, cluster });
                            break;
                        }
                        Ok(cluster) => clusters.push(cluster),
                        Err(source) => {
                            error = Some(source);
                            break;
                        }
                    }
                }
                let slots = clusters
                    .iter()
                    .flat_map(|&cluster| self.cluster_range(cluster).step_by(DENTRY_SIZE))
                    .map(SlotLocation::new)
                    .collect();
                DirSlots { slots, clusters, error }
            }
        }
    }
}
