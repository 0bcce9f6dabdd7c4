use std::collections::HashSet;

use tracing::{debug, info};

use crate::bitmap::Bitmap;
use crate::check::{Anomaly, LostChainPolicy, LostFile};
use crate::fat::{
    create_dentry, short_name, ClusterIdx, DirLocation, FatDentry, FatPartition, FatTable, PLACEHOLDER_EXTENSION,
};

/// Recovered chains are numbered `found1.dat`, `found2.dat`, ...; longer numbers would not fit an 8.3 name.
const MAX_FILE_NUMBER: u32 = 999;

/// An allocated, unreachable chain that is about to become a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LostChain {
    start: ClusterIdx,
    cluster_count: u32,
}

/// Groups allocated clusters that `reachable` does not cover into chains and gives each of them a dentry in the root
/// directory, named after the first unused `found<N>.dat`.
pub fn recover_lost_chains(
    partition: &mut FatPartition,
    reachable: &Bitmap,
    policy: LostChainPolicy,
) -> (Vec<LostFile>, Vec<Anomaly>) {
    let mut anomalies = Vec::new();
    let chains = match policy {
        LostChainPolicy::Positional => positional_chains(partition.fat_table(), reachable, &mut anomalies),
        LostChainPolicy::FollowLinks => linked_chains(partition.fat_table(), reachable, &mut anomalies),
    };

    let cluster_size = partition.cluster_size();
    let mut names = NameGenerator::new(partition);
    let mut lost_files = Vec::new();
    for chain in chains {
        let file_name = match names.next_name() {
            Some(file_name) => file_name,
            None => {
                anomalies.push(Anomaly::NoFreeFileName { start: chain.start });
                continue;
            }
        };
        let size = chain.cluster_count * cluster_size;
        match create_dentry(partition, DirLocation::Root, &file_name, chain.start, size) {
            Ok(_) => {
                debug!(file_name = %file_name, start = chain.start, clusters = chain.cluster_count, "Recovered lost chain");
                lost_files.push(LostFile { first_cluster: chain.start, cluster_count: chain.cluster_count, size, file_name });
            }
            Err(source) => anomalies.push(Anomaly::RecoveryFailed { start: chain.start, source }),
        }
    }
    info!(recovered = lost_files.len(), "Recovered lost chains");
    (lost_files, anomalies)
}

/// A run starts at the first allocated, unreachable cluster and ends at the next cluster whose entry is an
/// end-of-chain marker, regardless of where the links in between point.
fn positional_chains(fat_table: FatTable, reachable: &Bitmap, anomalies: &mut Vec<Anomaly>) -> Vec<LostChain> {
    let mut chains = Vec::new();
    let mut start = None;
    for idx in fat_table.data_clusters() {
        let entry = fat_table.get(idx);
        if start.is_none() && entry.is_allocated() && !reachable.get(usize::from(idx)) {
            start = Some(idx);
        }
        if let Some(first) = start {
            if entry.is_chain_end() {
                chains.push(LostChain { start: first, cluster_count: u32::from(idx - first) + 1 });
                start = None;
            }
        }
    }
    if let Some(first) = start {
        anomalies.push(Anomaly::UnterminatedLostRun { start: first });
    }
    chains
}

/// A chain starts at every lost cluster that no other lost cluster links to and follows the table from there.
/// Chains that run into a reachable cluster or into a chain recovered before are skipped, as are lost clusters that
/// no head leads to (e.g. lost cycles).
fn linked_chains(fat_table: FatTable, reachable: &Bitmap, anomalies: &mut Vec<Anomaly>) -> Vec<LostChain> {
    let cluster_end = fat_table.cluster_end();
    let bitmap_len = usize::from(cluster_end);
    let mut lost = Bitmap::new(bitmap_len);
    let mut pointed_to = Bitmap::new(bitmap_len);
    let mut claimed = Bitmap::new(bitmap_len);

    for idx in fat_table.data_clusters() {
        if fat_table.get(idx).is_allocated() && !reachable.get(usize::from(idx)) {
            lost.set(usize::from(idx));
        }
    }
    for idx in fat_table.data_clusters().filter(|&idx| lost.get(usize::from(idx))) {
        if let Some(next) = fat_table.get(idx).next_cluster(cluster_end) {
            if lost.get(usize::from(next)) {
                pointed_to.set(usize::from(next));
            }
        }
    }

    let mut chains = Vec::new();
    let heads: Vec<_> = fat_table
        .data_clusters()
        .filter(|&idx| lost.get(usize::from(idx)) && !pointed_to.get(usize::from(idx)))
        .collect();
    for head in heads {
        let mut walked = Vec::new();
        let mut failure = None;
        for item in fat_table.chain_iter(head) {
            match item {
                Ok(cluster) if reachable.get(usize::from(cluster)) || claimed.get(usize::from(cluster)) => {
                    failure = Some(Anomaly::CrossLinkedLostChain { start: head, cluster });
                    break;
                }
                Ok(cluster) => walked.push(cluster),
                Err(source) => {
                    failure = Some(Anomaly::BrokenLostChain { start: head, source });
                    break;
                }
            }
        }
        for &cluster in &walked {
            claimed.set(usize::from(cluster));
        }
        match failure {
            Some(anomaly) => anomalies.push(anomaly),
            None => chains.push(LostChain { start: head, cluster_count: walked.len() as u32 }),
        }
    }

    let headless = fat_table.data_clusters().filter(|&idx| lost.get(usize::from(idx)) && !claimed.get(usize::from(idx)));
    for (first, count) in consecutive_runs(headless) {
        anomalies.push(Anomaly::HeadlessLostClusters { first, count });
    }
    chains
}

/// Splits ascending indices into runs of consecutive indices, returned as `(first, length)`.
fn consecutive_runs(indices: impl Iterator<Item = ClusterIdx>) -> Vec<(ClusterIdx, usize)> {
    let mut runs: Vec<(ClusterIdx, usize)> = Vec::new();
    for idx in indices {
        match runs.last_mut() {
            Some((first, count)) if usize::from(*first) + *count == usize::from(idx) => *count += 1,
            _ => runs.push((idx, 1)),
        }
    }
    runs
}

/// Hands out `found<N>.dat` names whose stored 8.3 form is not yet used in the root directory.
struct NameGenerator {
    next_number: u32,
    taken: HashSet<String>,
}

impl NameGenerator {
    fn new(partition: &FatPartition) -> Self {
        let mut taken = HashSet::new();
        for slot in partition.dir_slots(DirLocation::Root).slots {
            let dentry = partition.dentry(slot);
            if dentry.is_dir_table_end() {
                break;
            }
            if !dentry.is_deleted() {
                taken.insert(dentry.display_name());
            }
        }
        Self { next_number: 1, taken }
    }

    fn next_name(&mut self) -> Option<String> {
        while self.next_number <= MAX_FILE_NUMBER {
            let file_name = format!("found{}.dat", self.next_number);
            self.next_number += 1;
            if self.taken.insert(stored_name(&file_name)) {
                return Some(file_name);
            }
        }
        None
    }
}

/// The name a dentry written for `file_name` displays.
fn stored_name(file_name: &str) -> String {
    let (short_name, extension) = short_name(file_name);
    let dentry = FatDentry {
        short_name,
        short_extension: extension.unwrap_or(PLACEHOLDER_EXTENSION),
        ..FatDentry::default()
    };
    dentry.display_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::mark_reachable;
    use crate::fat::test_image::TestImage;
    use crate::fat::{ChainError, CreateError, FatEntry, TreeWalker};

    fn recover(image: &mut [u8], policy: LostChainPolicy) -> (Vec<LostFile>, Vec<Anomaly>) {
        let mut partition = FatPartition::new(image).unwrap();
        let reachable = mark_reachable(&mut partition, &TreeWalker::default()).bitmap;
        recover_lost_chains(&mut partition, &reachable, policy)
    }

    fn starts(lost_files: &[LostFile]) -> Vec<(ClusterIdx, u32)> {
        lost_files.iter().map(|file| (file.first_cluster, file.cluster_count)).collect()
    }

    fn root_dentries(image: &mut [u8]) -> Vec<FatDentry> {
        let partition = FatPartition::new(image).unwrap();
        partition
            .dir_slots(DirLocation::Root)
            .slots
            .into_iter()
            .map(|slot| partition.dentry(slot))
            .take_while(|dentry| !dentry.is_dir_table_end())
            .collect()
    }

    #[test]
    fn recovers_contiguous_lost_chain() {
        let mut builder = TestImage::new();
        builder.contiguous_chain(10, 3);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::Positional);
        assert_eq!(
            lost_files,
            vec![LostFile { first_cluster: 10, cluster_count: 3, size: 1536, file_name: "found1.dat".to_string() }]
        );
        assert!(anomalies.is_empty());

        let dentries = root_dentries(&mut image);
        assert_eq!(dentries.len(), 1);
        assert_eq!(dentries[0].display_name(), "FOUND1.DAT");
        assert_eq!(dentries[0].first_cluster, 10);
        assert_eq!(dentries[0].file_size, 1536);
        assert!(dentries[0].is_file());
    }

    #[test]
    fn numbers_chains_in_index_order() {
        let mut builder = TestImage::new();
        builder.file_in(None, "KEEP.TXT", 5, 2);
        builder.contiguous_chain(40, 2);
        builder.contiguous_chain(20, 1);
        let mut image = builder.build();

        let (lost_files, _) = recover(&mut image, LostChainPolicy::Positional);
        assert_eq!(starts(&lost_files), vec![(20, 1), (40, 2)]);
        let names: Vec<_> = lost_files.iter().map(|file| file.file_name.as_str()).collect();
        assert_eq!(names, vec!["found1.dat", "found2.dat"]);
    }

    #[test]
    fn skips_names_already_in_root() {
        let mut builder = TestImage::new();
        builder.file_in(None, "FOUND1.DAT", 5, 1);
        builder.deleted_in(None);
        builder.contiguous_chain(10, 1);
        let mut image = builder.build();

        let (lost_files, _) = recover(&mut image, LostChainPolicy::Positional);
        assert_eq!(lost_files[0].file_name, "found2.dat");
        // the deleted slot is reused
        let names: Vec<_> = root_dentries(&mut image).iter().map(|dentry| dentry.display_name()).collect();
        assert_eq!(names, vec!["FOUND1.DAT", "FOUND2.DAT"]);
    }

    #[test]
    fn positional_scan_trusts_index_order() {
        let mut builder = TestImage::new();
        // 10 links to 12, 11 is a chain of its own
        builder.chain(&[10, 12]);
        builder.chain(&[11]);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::Positional);
        assert_eq!(starts(&lost_files), vec![(10, 2), (12, 1)]);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn linked_scan_follows_the_table() {
        let mut builder = TestImage::new();
        builder.chain(&[10, 12]);
        builder.chain(&[11]);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::FollowLinks);
        assert_eq!(starts(&lost_files), vec![(10, 2), (11, 1)]);
        assert_eq!(lost_files[0].size, 1024);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn reports_run_without_end_marker() {
        let mut builder = TestImage::new();
        // the last data cluster links back into the free part of the volume
        builder.set_entry(395, 3);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::Positional);
        assert!(lost_files.is_empty());
        assert_eq!(anomalies, vec![Anomaly::UnterminatedLostRun { start: 395 }]);
    }

    #[test]
    fn linked_scan_skips_cross_linked_chain() {
        let mut builder = TestImage::new();
        builder.file_in(None, "A.TXT", 10, 2);
        builder.set_entry(20, 11);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::FollowLinks);
        assert!(lost_files.is_empty());
        assert_eq!(anomalies, vec![Anomaly::CrossLinkedLostChain { start: 20, cluster: 11 }]);
    }

    #[test]
    fn linked_scan_reports_broken_and_headless_clusters() {
        let mut builder = TestImage::new();
        builder.set_entry(20, 21);
        builder.set_entry(21, 20);
        builder.set_entry(30, 0xFF0);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::FollowLinks);
        assert!(lost_files.is_empty());
        assert_eq!(
            anomalies,
            vec![
                Anomaly::BrokenLostChain {
                    start: 30,
                    source: ChainError::OutOfRange { cluster: 30, next: FatEntry::new(0xFF0) }
                },
                Anomaly::HeadlessLostClusters { first: 20, count: 2 },
            ]
        );
    }

    #[test]
    fn reports_full_root_directory() {
        let mut builder = TestImage::new();
        for idx in 0..16 {
            builder.file_in(None, &format!("F{}.TXT", idx), 0, 0);
        }
        builder.contiguous_chain(100, 2);
        let mut image = builder.build();

        let (lost_files, anomalies) = recover(&mut image, LostChainPolicy::Positional);
        assert!(lost_files.is_empty());
        assert_eq!(
            anomalies,
            vec![Anomaly::RecoveryFailed { start: 100, source: CreateError::DirectoryFull(DirLocation::Root) }]
        );
    }

    #[test]
    fn groups_consecutive_indices() {
        let runs = consecutive_runs([3, 4, 5, 9, 11, 12].into_iter());
        assert_eq!(runs, vec![(3, 3), (9, 1), (11, 2)]);
        assert!(consecutive_runs(std::iter::empty()).is_empty());
    }
}
