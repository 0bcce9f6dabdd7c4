use num::Integer;
use tracing::{debug, info};

use crate::check::{Anomaly, LengthMismatch};
use crate::fat::{DirEntry, FatEntry, FatPartition, TreeVisitor, TreeWalker, WalkError, NO_CLUSTER};

/// Compares every regular file's declared size with the length of its chain. Excess clusters are cut off and freed;
/// chains shorter than the declared size are only reported. Files with a broken chain or in a directory that could not
/// be read completely are left alone.
pub fn reconcile_lengths(partition: &mut FatPartition, walker: &TreeWalker) -> (Vec<LengthMismatch>, Vec<Anomaly>) {
    let mut reconciler = LengthReconciler { mismatches: Vec::new(), anomalies: Vec::new() };
    walker.walk(partition, &mut reconciler);
    info!(mismatches = reconciler.mismatches.len(), "Reconciled file lengths");
    (reconciler.mismatches, reconciler.anomalies)
}

struct LengthReconciler {
    mismatches: Vec<LengthMismatch>,
    anomalies: Vec<Anomaly>,
}

impl TreeVisitor for LengthReconciler {
    fn file(&mut self, partition: &mut FatPartition, entry: &DirEntry) {
        if entry.in_broken_directory {
            debug!(path = %entry.path, "Skipping file in broken directory");
            return;
        }
        let dentry = entry.dentry;
        let cluster_size = partition.cluster_size();
        let expected = Integer::div_ceil(&dentry.file_size, &cluster_size) as usize;

        let chain = partition.fat_table().walk_chain(dentry.first_cluster);
        if let Some(source) = chain.error {
            self.anomalies.push(Anomaly::BrokenChain { path: entry.path.clone(), source });
            return;
        }
        let actual = chain.len();
        if actual == expected {
            return;
        }

        if actual > expected {
            let (kept, excess) = chain.clusters.split_at(expected);
            match kept.last() {
                Some(&last) => partition.set_fat_entry(last, FatEntry::END_OF_CHAIN),
                None => {
                    let mut emptied = dentry;
                    emptied.first_cluster = NO_CLUSTER;
                    partition.set_dentry(entry.slot, &emptied);
                }
            }
            for &cluster in excess {
                partition.set_fat_entry(cluster, FatEntry::FREE);
            }
            debug!(path = %entry.path, kept = kept.len(), freed = excess.len(), "Truncated chain");
        } else {
            debug!(path = %entry.path, expected, actual, "Chain is shorter than the declared size");
        }

        self.mismatches.push(LengthMismatch {
            name: dentry.display_name(),
            path: entry.path.clone(),
            declared_size: dentry.file_size,
            actual_size: actual.min(expected) as u32 * cluster_size,
        });
    }

    fn walk_error(&mut self, error: WalkError) {
        self.anomalies.push(error.into());
    }
}
