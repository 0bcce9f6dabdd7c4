use thiserror::Error;
use tracing::{debug, warn};

use crate::fat::{
    Attributes, ChainError, ClusterIdx, DirLocation, FatDentry, FatPartition, SlotLocation, SLOT_DELETED, SLOT_EMPTY,
};

/// Extension used when a file name has none.
pub const PLACEHOLDER_EXTENSION: [u8; 3] = *b"___";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    #[error("no free slot left in {0:?}")]
    DirectoryFull(DirLocation),
    #[error("cannot insert into {dir:?}: {source}")]
    BrokenDirectory { dir: DirLocation, source: ChainError },
}

/// Converts a path-like file name into a space-padded, upper-case 8.3 name. Anything up to the last path separator is
/// discarded, the extension starts after the last period and both parts are truncated to fit.
/// Returns `None` as the extension if the name has none.
pub fn short_name(file_name: &str) -> ([u8; 8], Option<[u8; 3]>) {
    let base_name = file_name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(file_name);
    let upper_name = base_name.to_ascii_uppercase();
    let (name, extension) = match upper_name.rfind('.') {
        Some(period_idx) => (&upper_name[..period_idx], Some(&upper_name[period_idx + 1..])),
        None => (upper_name.as_str(), None),
    };
    (pad(name.as_bytes()), extension.map(|extension| pad(extension.as_bytes())))
}

fn pad<const N: usize>(text: &[u8]) -> [u8; N] {
    let mut field = [b' '; N];
    let len = text.len().min(N);
    field[..len].copy_from_slice(&text[..len]);
    field
}

/// Overwrites `slot` with a dentry for a regular file. Time stamps are left zeroed.
pub fn write_dentry(
    partition: &mut FatPartition,
    slot: SlotLocation,
    file_name: &str,
    first_cluster: ClusterIdx,
    size: u32,
) {
    let (short_name, extension) = short_name(file_name);
    let short_extension = extension.unwrap_or_else(|| {
        warn!(file_name, "No filename extension given - defaulting to .___");
        PLACEHOLDER_EXTENSION
    });
    let dentry = FatDentry {
        short_name,
        short_extension,
        attrs: Attributes::NORMAL.bits(),
        first_cluster,
        file_size: size,
        ..FatDentry::default()
    };
    partition.set_dentry(slot, &dentry);
}

/// Creates a dentry in `dir`, either in the first deleted slot or at the end of the directory. When appending, the slot
/// after the new dentry becomes the new end marker, unless the new dentry uses the directory's last slot.
pub fn create_dentry(
    partition: &mut FatPartition,
    dir: DirLocation,
    file_name: &str,
    first_cluster: ClusterIdx,
    size: u32,
) -> Result<SlotLocation, CreateError> {
    let dir_slots = partition.dir_slots(dir);
    if let Some(source) = dir_slots.error {
        return Err(CreateError::BrokenDirectory { dir, source });
    }

    for (slot_idx, &slot) in dir_slots.slots.iter().enumerate() {
        match partition.dentry(slot).short_name[0] {
            SLOT_EMPTY => {
                write_dentry(partition, slot, file_name, first_cluster, size);
                if let Some(&next_slot) = dir_slots.slots.get(slot_idx + 1) {
                    partition.set_dentry(next_slot, &FatDentry::end_of_directory());
                }
                debug!(file_name, slot = slot.offset(), "Appended dentry");
                return Ok(slot);
            }
            SLOT_DELETED => {
                write_dentry(partition, slot, file_name, first_cluster, size);
                debug!(file_name, slot = slot.offset(), "Reused deleted dentry");
                return Ok(slot);
            }
            _ => {}
        }
    }
    Err(CreateError::DirectoryFull(dir))
}
