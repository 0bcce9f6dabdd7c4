use tracing::info;

use crate::bitmap::Bitmap;
use crate::fat::{ClusterIdx, FatPartition};

/// Returns every data cluster that is allocated in the table but was not marked reachable, in ascending order.
pub fn find_unreferenced(partition: &FatPartition, reachable: &Bitmap) -> Vec<ClusterIdx> {
    let fat_table = partition.fat_table();
    let unreferenced: Vec<_> = fat_table
        .data_clusters()
        .filter(|&idx| fat_table.get(idx).is_allocated() && !reachable.get(usize::from(idx)))
        .collect();
    info!(count = unreferenced.len(), "Found unreferenced clusters");
    unreferenced
}
