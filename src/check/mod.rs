//! The four passes of a volume check. Each pass returns what it found together with the anomalies it ran into;
//! `check` runs them in order on the same partition and collects everything into a `Report`.

mod length;
mod lost_chains;
mod reachability;
mod report;
mod unreferenced;

use tracing::{info_span, warn};

pub use self::length::*;
pub use self::lost_chains::*;
pub use self::reachability::*;
pub use self::report::*;
pub use self::unreferenced::*;
use crate::fat::{FatPartition, TreeWalker, DEFAULT_MAX_DEPTH};

/// How allocated, unreachable clusters are grouped into chains before they are recovered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LostChainPolicy {
    /// A chain runs from the first lost cluster up to the next end-of-chain entry in index order. The links in
    /// between are not followed.
    Positional,
    /// Chains start at lost clusters no other lost cluster links to and follow the allocation table.
    FollowLinks,
}

#[derive(Debug, Copy, Clone)]
pub struct CheckOptions {
    pub lost_chain_policy: LostChainPolicy,
    pub max_depth: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self { lost_chain_policy: LostChainPolicy::Positional, max_depth: DEFAULT_MAX_DEPTH }
    }
}

/// Runs all passes: reachability, unreferenced clusters, lost chain recovery and length reconciliation.
/// Repairs are written into `partition`; nothing is written if the volume is consistent.
pub fn check(partition: &mut FatPartition, options: &CheckOptions) -> Report {
    let walker = TreeWalker::new(options.max_depth);
    let mut report = Report::default();

    let reachability = info_span!("reachability").in_scope(|| mark_reachable(partition, &walker));
    report.add_anomalies(reachability.anomalies);

    report.unreferenced =
        info_span!("unreferenced").in_scope(|| find_unreferenced(partition, &reachability.bitmap));

    // clusters of the unread part of the tree look lost, recovering them would cross-link live files
    if reachability.complete {
        let (lost_files, anomalies) = info_span!("lost_chains", policy = ?options.lost_chain_policy)
            .in_scope(|| recover_lost_chains(partition, &reachability.bitmap, options.lost_chain_policy));
        report.lost_files = lost_files;
        report.add_anomalies(anomalies);
    } else if !report.unreferenced.is_empty() {
        warn!(unreferenced = report.unreferenced.len(), "Directory tree was not read completely, skipping recovery");
        report.add_anomalies(vec![Anomaly::RecoverySkipped { unreferenced: report.unreferenced.len() }]);
    }

    let (length_mismatches, anomalies) = info_span!("length").in_scope(|| reconcile_lengths(partition, &walker));
    report.length_mismatches = length_mismatches;
    report.add_anomalies(anomalies);

    report
}
