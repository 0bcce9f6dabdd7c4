use std::convert::TryInto;

use bitflags::bitflags;

use crate::fat::ClusterIdx;
use crate::util::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};

pub const DENTRY_SIZE: usize = 32;

/// First name byte of the slot after the last used slot of a directory.
pub const SLOT_EMPTY: u8 = 0x00;
/// First name byte of a deleted slot that may be reused.
pub const SLOT_DELETED: u8 = 0xE5;

const DOT_NAME: [u8; 8] = *b".       ";
const DOT_DOT_NAME: [u8; 8] = *b"..      ";

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl Attributes {
    /// Attribute byte of a plain file without any flags.
    pub const NORMAL: Self = Self::empty();
}

/// A short-name directory entry. Byte layout:
///
/// | offset | size | field |
/// |--------|------|-------|
/// | 0      | 8    | name, space padded |
/// | 8      | 3    | extension, space padded |
/// | 11     | 1    | attributes |
/// | 12     | 1    | reserved (name case flags) |
/// | 13     | 1    | creation time, 10 ms units |
/// | 14     | 2    | creation time |
/// | 16     | 2    | creation date |
/// | 18     | 2    | access date |
/// | 20     | 2    | high half of the start cluster, unused on FAT12 |
/// | 22     | 2    | modification time |
/// | 24     | 2    | modification date |
/// | 26     | 2    | start cluster |
/// | 28     | 4    | file size in bytes |
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FatDentry {
    pub short_name: [u8; 8],
    pub short_extension: [u8; 3],
    pub attrs: u8,
    pub reserved: u8,
    pub create_time_10_ms: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub first_cluster_hi: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub first_cluster: ClusterIdx,
    pub file_size: u32,
}

impl FatDentry {
    /// PANICS: Panics if `bytes` is shorter than `DENTRY_SIZE`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let bytes = &bytes[..DENTRY_SIZE];
        Self {
            short_name: bytes[0..8].try_into().unwrap_or_default(),
            short_extension: bytes[8..11].try_into().unwrap_or_default(),
            attrs: bytes[11],
            reserved: bytes[12],
            create_time_10_ms: bytes[13],
            create_time: read_u16_le(bytes, 14),
            create_date: read_u16_le(bytes, 16),
            access_date: read_u16_le(bytes, 18),
            first_cluster_hi: read_u16_le(bytes, 20),
            mod_time: read_u16_le(bytes, 22),
            mod_date: read_u16_le(bytes, 24),
            first_cluster: read_u16_le(bytes, 26),
            file_size: read_u32_le(bytes, 28),
        }
    }

    pub fn to_bytes(&self) -> [u8; DENTRY_SIZE] {
        let mut bytes = [0; DENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.short_name);
        bytes[8..11].copy_from_slice(&self.short_extension);
        bytes[11] = self.attrs;
        bytes[12] = self.reserved;
        bytes[13] = self.create_time_10_ms;
        write_u16_le(&mut bytes, 14, self.create_time);
        write_u16_le(&mut bytes, 16, self.create_date);
        write_u16_le(&mut bytes, 18, self.access_date);
        write_u16_le(&mut bytes, 20, self.first_cluster_hi);
        write_u16_le(&mut bytes, 22, self.mod_time);
        write_u16_le(&mut bytes, 24, self.mod_date);
        write_u16_le(&mut bytes, 26, self.first_cluster);
        write_u32_le(&mut bytes, 28, self.file_size);
        bytes
    }

    /// A slot that only marks the end of its directory.
    pub fn end_of_directory() -> Self {
        Self::default()
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attrs)
    }

    /// True iff self is invalid and the directory contains no more valid dentries
    pub fn is_dir_table_end(&self) -> bool {
        self.short_name[0] == SLOT_EMPTY
    }

    /// True iff self is invalid but the directory might contain more valid dentries
    pub fn is_deleted(&self) -> bool {
        self.short_name[0] == SLOT_DELETED
    }

    /// True iff the dentry represents either the current directory `.` or the parent directory `..`
    pub fn is_dot_dir(&self) -> bool {
        self.short_name == DOT_NAME || self.short_name == DOT_DOT_NAME
    }

    /// Long file name slots set the volume flag as well, so they count as volume labels.
    pub fn is_volume_label(&self) -> bool {
        self.attributes().contains(Attributes::VOLUME)
    }

    pub fn is_dir(&self) -> bool {
        !self.is_volume_label() && self.attributes().contains(Attributes::DIRECTORY)
    }

    pub fn is_file(&self) -> bool {
        !self.is_volume_label() && !self.is_dir()
    }

    /// The name and extension with padding removed, joined by a period, e.g. `README.TXT` or `NOEXT.`
    pub fn display_name(&self) -> String {
        format!("{}.{}", trim_padding(&self.short_name), trim_padding(&self.short_extension))
    }

    /// The name as it would be typed: like `display_name`, but without a period if there is no extension.
    pub fn file_name(&self) -> String {
        let name = trim_padding(&self.short_name);
        let extension = trim_padding(&self.short_extension);
        if extension.is_empty() {
            name
        } else {
            format!("{}.{}", name, extension)
        }
    }
}

fn trim_padding(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_end_matches(' ').to_string()
}
