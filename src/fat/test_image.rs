//! Builds small in-memory FAT12 volumes for tests: 400 sectors of 512 bytes, two allocation tables of two sectors
//! each and a one-sector root directory with 16 slots.

use crate::fat::{
    write_packed_entry, Attributes, ClusterIdx, FatDentry, FatEntry, SlotLocation, DENTRY_SIZE, NO_CLUSTER,
    SLOT_DELETED,
};

pub const SECTOR_SIZE: usize = 512;
pub const CLUSTER_SIZE: usize = SECTOR_SIZE;
const SECTOR_COUNT: u16 = 400;
const RESERVED_SECTORS: u16 = 1;
const FAT_COUNT: u8 = 2;
const SECTORS_PER_FAT: u16 = 2;
const ROOT_ENTRIES: u16 = 16;

/// Refers to a directory created with `TestImage::dir_in`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DirHandle(usize);

struct TestDir {
    first_cluster: ClusterIdx,
    slots: Vec<SlotLocation>,
    used: usize,
}

pub struct TestImage {
    image: Vec<u8>,
    sectors_per_cluster: u8,
    dirs: Vec<TestDir>,
}

impl TestImage {
    pub fn new() -> Self {
        Self::with_sectors_per_cluster(1)
    }

    pub fn with_sectors_per_cluster(sectors_per_cluster: u8) -> Self {
        let mut image = vec![0; usize::from(SECTOR_COUNT) * SECTOR_SIZE];
        image[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        image[3..11].copy_from_slice(b"MSDOS5.0");
        image[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        image[13] = sectors_per_cluster;
        image[14..16].copy_from_slice(&RESERVED_SECTORS.to_le_bytes());
        image[16] = FAT_COUNT;
        image[17..19].copy_from_slice(&ROOT_ENTRIES.to_le_bytes());
        image[19..21].copy_from_slice(&SECTOR_COUNT.to_le_bytes());
        image[21] = 0xF0;
        image[22..24].copy_from_slice(&SECTORS_PER_FAT.to_le_bytes());
        image[24..26].copy_from_slice(&18u16.to_le_bytes());
        image[26..28].copy_from_slice(&2u16.to_le_bytes());
        image[510..512].copy_from_slice(&[0x55, 0xAA]);

        let root_start = Self::root_start();
        let root_slots = (0..usize::from(ROOT_ENTRIES)).map(|idx| SlotLocation::new(root_start + idx * DENTRY_SIZE));
        let mut instance = Self {
            image,
            sectors_per_cluster,
            dirs: vec![TestDir { first_cluster: NO_CLUSTER, slots: root_slots.collect(), used: 0 }],
        };
        instance.set_entry(0, 0xFF0);
        instance.set_entry(1, 0xFFF);
        instance
    }

    pub fn build(&self) -> Vec<u8> {
        self.image.clone()
    }

    pub fn cluster_size(&self) -> usize {
        CLUSTER_SIZE * usize::from(self.sectors_per_cluster)
    }

    pub fn dentries_per_cluster(&self) -> usize {
        self.cluster_size() / DENTRY_SIZE
    }

    fn root_start() -> usize {
        (usize::from(RESERVED_SECTORS) + usize::from(FAT_COUNT) * usize::from(SECTORS_PER_FAT)) * SECTOR_SIZE
    }

    fn cluster_start(&self, cluster: ClusterIdx) -> usize {
        Self::root_start() + usize::from(ROOT_ENTRIES) * DENTRY_SIZE + usize::from(cluster - 2) * self.cluster_size()
    }

    /// Writes a raw value into both allocation tables.
    pub fn set_entry(&mut self, idx: ClusterIdx, value: u16) {
        let fat_len = usize::from(SECTORS_PER_FAT) * SECTOR_SIZE;
        for copy_idx in 0..usize::from(FAT_COUNT) {
            let start = usize::from(RESERVED_SECTORS) * SECTOR_SIZE + copy_idx * fat_len;
            write_packed_entry(&mut self.image[start..start + fat_len], idx, FatEntry::new(value));
        }
    }

    /// Links `clusters` in the given order and terminates the chain.
    pub fn chain(&mut self, clusters: &[ClusterIdx]) {
        for pair in clusters.windows(2) {
            self.set_entry(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_entry(last, 0xFFF);
        }
    }

    /// Chains `cluster_count` consecutive clusters starting at `first_cluster`.
    pub fn contiguous_chain(&mut self, first_cluster: ClusterIdx, cluster_count: u16) {
        let clusters: Vec<_> = (first_cluster..first_cluster + cluster_count).collect();
        self.chain(&clusters);
    }

    pub fn dentry_in(&mut self, dir: Option<DirHandle>, dentry: &FatDentry) -> SlotLocation {
        let dir = &mut self.dirs[dir.map_or(0, |handle| handle.0)];
        let slot = dir.slots[dir.used];
        dir.used += 1;
        self.image[slot.byte_range()].copy_from_slice(&dentry.to_bytes());
        slot
    }

    pub fn volume_label(&mut self, label: &str) -> SlotLocation {
        let mut dentry = short_name_dentry(label, "");
        dentry.attrs = Attributes::VOLUME.bits();
        self.dentry_in(None, &dentry)
    }

    /// A file whose declared size matches its contiguous chain exactly.
    pub fn file_in(
        &mut self,
        dir: Option<DirHandle>,
        name: &str,
        first_cluster: ClusterIdx,
        cluster_count: u16,
    ) -> SlotLocation {
        let clusters: Vec<_> = (first_cluster..first_cluster + cluster_count).collect();
        let size = (usize::from(cluster_count) * self.cluster_size()) as u32;
        self.file_with_chain_in(dir, name, &clusters, size)
    }

    pub fn file_with_chain_in(
        &mut self,
        dir: Option<DirHandle>,
        name: &str,
        clusters: &[ClusterIdx],
        size: u32,
    ) -> SlotLocation {
        self.chain(clusters);
        let (base, extension) = split_name(name);
        let mut dentry = short_name_dentry(base, extension);
        dentry.first_cluster = clusters.first().copied().unwrap_or(NO_CLUSTER);
        dentry.file_size = size;
        dentry.attrs = Attributes::ARCHIVE.bits();
        self.dentry_in(dir, &dentry)
    }

    /// A directory dentry only, without `.`/`..` and without touching the allocation table.
    pub fn dir_entry_in(&mut self, dir: Option<DirHandle>, name: &str, first_cluster: ClusterIdx) -> SlotLocation {
        let mut dentry = short_name_dentry(name, "");
        dentry.first_cluster = first_cluster;
        dentry.attrs = Attributes::DIRECTORY.bits();
        self.dentry_in(dir, &dentry)
    }

    pub fn dir_in(&mut self, dir: Option<DirHandle>, name: &str, cluster: ClusterIdx) -> DirHandle {
        self.dir_with_clusters_in(dir, name, &[cluster])
    }

    /// A directory stored in `clusters`, starting with `.` and `..` slots.
    pub fn dir_with_clusters_in(&mut self, dir: Option<DirHandle>, name: &str, clusters: &[ClusterIdx]) -> DirHandle {
        self.chain(clusters);
        self.dir_entry_in(dir, name, clusters[0]);

        let slots = clusters
            .iter()
            .flat_map(|&cluster| {
                let start = self.cluster_start(cluster);
                (start..start + self.cluster_size()).step_by(DENTRY_SIZE).map(SlotLocation::new)
            })
            .collect();
        self.dirs.push(TestDir { first_cluster: clusters[0], slots, used: 0 });
        let handle = DirHandle(self.dirs.len() - 1);

        let parent_cluster = self.dirs[dir.map_or(0, |parent| parent.0)].first_cluster;
        for (dot_name, cluster) in [(".", clusters[0]), ("..", parent_cluster)] {
            let mut dentry = short_name_dentry(dot_name, "");
            dentry.first_cluster = cluster;
            dentry.attrs = Attributes::DIRECTORY.bits();
            self.dentry_in(Some(handle), &dentry);
        }
        handle
    }

    pub fn deleted_in(&mut self, dir: Option<DirHandle>) -> SlotLocation {
        let mut dentry = short_name_dentry("GONE", "TXT");
        dentry.short_name[0] = SLOT_DELETED;
        dentry.first_cluster = 99;
        dentry.file_size = 1;
        self.dentry_in(dir, &dentry)
    }

    pub fn end_of_directory_in(&mut self, dir: Option<DirHandle>) -> SlotLocation {
        self.dentry_in(dir, &FatDentry::end_of_directory())
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => (name, ""),
    }
}

fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let len = text.len().min(N);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}

fn short_name_dentry(name: &str, extension: &str) -> FatDentry {
    FatDentry { short_name: padded(name), short_extension: padded(extension), ..FatDentry::default() }
}
