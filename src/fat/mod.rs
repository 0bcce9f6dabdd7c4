mod boot_sector;
mod dentry;
mod dentry_writer;
mod dir_iter;
mod entry;
mod partition;
mod table;
#[cfg(test)]
pub mod test_image;

pub use self::boot_sector::*;
pub use self::dentry::*;
pub use self::dentry_writer::*;
pub use self::dir_iter::*;
pub use self::entry::*;
pub use self::partition::*;
pub use self::table::*;

/// An index identifying a cluster, and thereby also its allocation table entry.
pub type ClusterIdx = u16;

/// Entries 0 and 1 of the allocation table are reserved, so the n-th table entry corresponds to the (n-2)-th cluster
/// of the data region.
pub const FIRST_DATA_CLUSTER: ClusterIdx = 2;

/// Start cluster stored in a dentry of a file without data; `..` entries also use it to refer to the root directory.
pub const NO_CLUSTER: ClusterIdx = 0;
