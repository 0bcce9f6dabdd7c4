use tracing::{debug, info};

use crate::bitmap::Bitmap;
use crate::check::Anomaly;
use crate::fat::{ClusterIdx, DirEntry, FatPartition, TreeVisitor, TreeWalker, WalkError};

/// The outcome of the reachability pass.
pub struct Reachability {
    /// One flag per table entry (`0..cluster_end`).
    pub bitmap: Bitmap,
    pub anomalies: Vec<Anomaly>,
    /// False if part of the tree was not read, either because it is nested too deep or because a directory's chain
    /// is broken. Clusters of that part are then missing from `bitmap`.
    pub complete: bool,
}

/// Marks every cluster reachable from the root directory: the clusters storing directories, the start clusters of
/// volume labels and the chains of regular files.
pub fn mark_reachable(partition: &mut FatPartition, walker: &TreeWalker) -> Reachability {
    let mut marker = ReachabilityMarker {
        bitmap: Bitmap::new(usize::from(partition.cluster_end())),
        anomalies: Vec::new(),
        complete: true,
    };
    walker.walk(partition, &mut marker);
    info!(reachable = marker.bitmap.count_set(), complete = marker.complete, "Marked reachable clusters");
    Reachability { bitmap: marker.bitmap, anomalies: marker.anomalies, complete: marker.complete }
}

struct ReachabilityMarker {
    bitmap: Bitmap,
    anomalies: Vec<Anomaly>,
    complete: bool,
}

impl ReachabilityMarker {
    /// Out-of-range start clusters are reported by whoever follows them, so they are silently ignored here.
    fn mark(&mut self, cluster: ClusterIdx) {
        if usize::from(cluster) < self.bitmap.len() {
            self.bitmap.set(usize::from(cluster));
        }
    }
}

impl TreeVisitor for ReachabilityMarker {
    fn directory_cluster(&mut self, cluster: ClusterIdx) {
        self.mark(cluster);
    }

    /// Volume labels own no chain, only their start cluster is marked.
    fn volume_label(&mut self, _partition: &mut FatPartition, entry: &DirEntry) {
        self.mark(entry.dentry.first_cluster);
    }

    fn directory(&mut self, _partition: &mut FatPartition, entry: &DirEntry) {
        self.mark(entry.dentry.first_cluster);
    }

    fn file(&mut self, partition: &mut FatPartition, entry: &DirEntry) {
        let chain = partition.fat_table().walk_chain(entry.dentry.first_cluster);
        debug!(path = %entry.path, clusters = chain.len(), "Marking file chain");
        for &cluster in &chain.clusters {
            self.mark(cluster);
        }
        if let Some(source) = chain.error {
            self.anomalies.push(Anomaly::BrokenChain { path: entry.path.clone(), source });
        }
    }

    fn walk_error(&mut self, error: WalkError) {
        if matches!(error, WalkError::TooDeep { .. } | WalkError::BrokenDirectory { .. }) {
            self.complete = false;
        }
        self.anomalies.push(error.into());
    }
}
