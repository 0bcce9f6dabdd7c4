use std::convert::TryFrom;
use std::ops::Range;

use anyhow::{bail, Context, Result};

use crate::fat::{ClusterIdx, DENTRY_SIZE, FIRST_DATA_CLUSTER};
use crate::util::{read_u16_le, read_u32_le};

/// FAT12 cannot describe this many data clusters, larger volumes use FAT16.
const FAT12_MAX_CLUSTERS: u32 = 4085;
const BOOT_SIGNATURE: u16 = 0xAA55;
const BOOT_SIGNATURE_OFFSET: usize = 510;
const MIN_BOOT_SECTOR_LEN: usize = 512;

/// The BIOS parameter block of a FAT12 volume, i.e. the geometry fields of the boot sector.
///
/// The on-disk record is read field by field, so the struct layout has no relation to the byte layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootSector {
    pub jump_instruction: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub sector_count_1: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_disk_track: u16,
    pub disk_heads: u16,
    pub hidden_sectors_before_partition: u32,
    pub sector_count_2: u32,
}

impl BootSector {
    /// Parses and validates the boot sector at the start of `image`. Fails if `image` is not a FAT12 volume that fits
    /// into `image`.
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < MIN_BOOT_SECTOR_LEN {
            bail!("Image is only {} bytes long, too short for a boot sector", image.len());
        }

        let mut jump_instruction = [0; 3];
        jump_instruction.copy_from_slice(&image[0..3]);
        let mut oem_name = [0; 8];
        oem_name.copy_from_slice(&image[3..11]);

        let boot_sector = Self {
            jump_instruction,
            oem_name,
            bytes_per_sector: read_u16_le(image, 11),
            sectors_per_cluster: image[13],
            reserved_sectors: read_u16_le(image, 14),
            fat_count: image[16],
            root_entries: read_u16_le(image, 17),
            sector_count_1: read_u16_le(image, 19),
            media_descriptor: image[21],
            sectors_per_fat: read_u16_le(image, 22),
            sectors_per_disk_track: read_u16_le(image, 24),
            disk_heads: read_u16_le(image, 26),
            hidden_sectors_before_partition: read_u32_le(image, 28),
            sector_count_2: read_u32_le(image, 32),
        };

        if read_u16_le(image, BOOT_SIGNATURE_OFFSET) != BOOT_SIGNATURE {
            bail!("Boot sector signature is missing");
        }
        boot_sector.validate(image.len()).context("Image is not a valid FAT12 volume")?;
        Ok(boot_sector)
    }

    fn validate(&self, image_len: usize) -> Result<()> {
        if !matches!(self.jump_instruction[0], 0xEB | 0xE9) {
            bail!("Invalid jump instruction {:#04x}", self.jump_instruction[0]);
        }
        if !self.bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&self.bytes_per_sector) {
            bail!("Invalid sector size {}", self.bytes_per_sector);
        }
        if !self.sectors_per_cluster.is_power_of_two() {
            bail!("Invalid cluster size of {} sectors", self.sectors_per_cluster);
        }
        if self.reserved_sectors == 0 {
            bail!("No reserved sectors");
        }
        if self.fat_count == 0 {
            bail!("No allocation table");
        }
        if self.root_entries == 0 {
            bail!("Root directory has no entries");
        }
        if self.sectors_per_fat == 0 {
            bail!("Allocation table is empty");
        }
        if self.sector_count() == 0 {
            bail!("Volume has no sectors");
        }

        let volume_size = self.volume_size();
        if u64::try_from(image_len)? < volume_size {
            bail!("Volume claims {} bytes but the image only has {}", volume_size, image_len);
        }
        if self.first_data_sector() > self.sector_count() {
            bail!("Metadata regions exceed the volume size");
        }

        let cluster_count = self.data_cluster_count();
        if cluster_count >= FAT12_MAX_CLUSTERS {
            bail!("{} data clusters is too many for FAT12", cluster_count);
        }
        let table_capacity = self.fat_table_range().len() * 2 / 3;
        if table_capacity < usize::from(self.cluster_end()) {
            bail!(
                "Allocation table holds {} entries but the volume has {} clusters",
                table_capacity,
                cluster_count
            );
        }
        Ok(())
    }

    pub fn sector_count(&self) -> u32 {
        if self.sector_count_1 != 0 {
            u32::from(self.sector_count_1)
        } else {
            self.sector_count_2
        }
    }

    /// in bytes
    pub fn volume_size(&self) -> u64 {
        u64::from(self.bytes_per_sector) * u64::from(self.sector_count())
    }

    /// in bytes
    pub fn cluster_size(&self) -> u32 {
        u32::from(self.sectors_per_cluster) * u32::from(self.bytes_per_sector)
    }

    /// Returns the range in bytes of the `copy_idx`-th allocation table, relative to the volume start
    pub fn fat_range(&self, copy_idx: u8) -> Range<usize> {
        let fat_len = usize::from(self.sectors_per_fat) * usize::from(self.bytes_per_sector);
        let first_fat_start = usize::from(self.reserved_sectors) * usize::from(self.bytes_per_sector);
        let start = first_fat_start + usize::from(copy_idx) * fat_len;
        start..start + fat_len
    }

    /// Returns the range in bytes of the first allocation table, relative to the volume start
    pub fn fat_table_range(&self) -> Range<usize> {
        self.fat_range(0)
    }

    /// Returns the range in bytes of the fixed-size root directory region, relative to the volume start
    pub fn root_dir_range(&self) -> Range<usize> {
        let start = self.fat_range(self.fat_count).start;
        start..start + self.root_dir_len()
    }

    fn root_dir_len(&self) -> usize {
        usize::from(self.root_entries) * DENTRY_SIZE
    }

    fn root_dir_sectors(&self) -> u32 {
        let bytes_per_sector = u32::from(self.bytes_per_sector);
        (u32::from(self.root_entries) * DENTRY_SIZE as u32 + bytes_per_sector - 1) / bytes_per_sector
    }

    fn first_data_sector(&self) -> u32 {
        u32::from(self.reserved_sectors)
            + u32::from(self.sectors_per_fat) * u32::from(self.fat_count)
            + self.root_dir_sectors()
    }

    /// Returns the offset in bytes of cluster 2, the first data cluster
    pub fn first_data_byte(&self) -> usize {
        self.first_data_sector() as usize * usize::from(self.bytes_per_sector)
    }

    pub fn data_cluster_count(&self) -> u32 {
        self.sector_count().saturating_sub(self.first_data_sector()) / u32::from(self.sectors_per_cluster)
    }

    /// One past the highest valid cluster index, i.e. data clusters are `2..cluster_end()`.
    pub fn cluster_end(&self) -> ClusterIdx {
        // `validate` guarantees that the count is below `FAT12_MAX_CLUSTERS`
        (self.data_cluster_count() + u32::from(FIRST_DATA_CLUSTER)) as ClusterIdx
    }
}
