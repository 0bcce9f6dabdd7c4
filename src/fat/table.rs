use thiserror::Error;

use crate::fat::{ClusterIdx, FatEntry, FIRST_DATA_CLUSTER, NO_CLUSTER};

/// Reasons a chain walk stops before reaching an end-of-chain marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("start cluster {start} is not a data cluster")]
    InvalidStart { start: ClusterIdx },
    #[error("cluster {cluster} links to {next}, which is not a data cluster")]
    OutOfRange { cluster: ClusterIdx, next: FatEntry },
    #[error("chain starting at cluster {start} has no end-of-chain marker within {limit} clusters")]
    Unterminated { start: ClusterIdx, limit: usize },
    #[error("chain starting at cluster {start} loops back to cluster {cluster}")]
    Cycle { start: ClusterIdx, cluster: ClusterIdx },
}

/// Reads the 12-bit entry for `idx` from a packed table: two entries share three bytes.
/// PANICS: Panics if `table` is too short to hold entry `idx`.
pub fn read_packed_entry(table: &[u8], idx: ClusterIdx) -> FatEntry {
    let offset = packed_offset(idx);
    let pair = u16::from_le_bytes([table[offset], table[offset + 1]]);
    if idx % 2 == 0 {
        FatEntry::new(pair)
    } else {
        FatEntry::new(pair >> 4)
    }
}

/// Writes the 12-bit entry for `idx`, leaving the neighbouring entry's nibble untouched.
/// PANICS: Panics if `table` is too short to hold entry `idx`.
pub fn write_packed_entry(table: &mut [u8], idx: ClusterIdx, entry: FatEntry) {
    let offset = packed_offset(idx);
    let pair = u16::from_le_bytes([table[offset], table[offset + 1]]);
    let pair = if idx % 2 == 0 {
        (pair & 0xF000) | entry.value()
    } else {
        (pair & 0x000F) | (entry.value() << 4)
    };
    table[offset..offset + 2].copy_from_slice(&pair.to_le_bytes());
}

fn packed_offset(idx: ClusterIdx) -> usize {
    usize::from(idx) * 3 / 2
}

/// A read-only view of the first allocation table of a volume.
#[derive(Copy, Clone)]
pub struct FatTable<'a> {
    table_data: &'a [u8],
    cluster_end: ClusterIdx,
}

impl<'a> FatTable<'a> {
    /// PANICS: Panics if `table_data` cannot hold an entry for every index below `cluster_end`.
    pub fn new(table_data: &'a [u8], cluster_end: ClusterIdx) -> Self {
        assert!(cluster_end == 0 || packed_offset(cluster_end - 1) + 1 < table_data.len());
        Self { table_data, cluster_end }
    }

    /// PANICS: Panics if `idx` is not below `cluster_end`.
    pub fn get(&self, idx: ClusterIdx) -> FatEntry {
        assert!(idx < self.cluster_end);
        read_packed_entry(self.table_data, idx)
    }

    pub fn cluster_end(&self) -> ClusterIdx {
        self.cluster_end
    }

    /// The valid data cluster indices, `2..cluster_end`.
    pub fn data_clusters(&self) -> impl Iterator<Item = ClusterIdx> {
        FIRST_DATA_CLUSTER..self.cluster_end
    }

    pub fn is_data_cluster(&self, idx: ClusterIdx) -> bool {
        (FIRST_DATA_CLUSTER..self.cluster_end).contains(&idx)
    }

    /// A walk may visit every data cluster once, anything longer must contain a cycle.
    pub fn chain_limit(&self) -> usize {
        usize::from(self.cluster_end.saturating_sub(FIRST_DATA_CLUSTER))
    }

    /// Given a file's first cluster, returns an iterator over all of the file's clusters (including the first one).
    pub fn chain_iter(self, first_cluster: ClusterIdx) -> ChainIter<'a> {
        ChainIter::new(first_cluster, self)
    }

    /// Follows the chain from `first_cluster`, keeping the clusters visited before an error.
    pub fn walk_chain(self, first_cluster: ClusterIdx) -> Chain {
        let mut clusters = Vec::new();
        for item in self.chain_iter(first_cluster) {
            match item {
                Ok(cluster) => clusters.push(cluster),
                Err(error) => return Chain { clusters, error: Some(error) },
            }
        }
        Chain { clusters, error: None }
    }
}

/// The clusters of a chain in chain order, plus the reason the walk stopped early, if it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub clusters: Vec<ClusterIdx>,
    pub error: Option<ChainError>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }
}

/// Iterates over the clusters of a chain, yielding an error and stopping if the chain leaves the data region or
/// exceeds the volume's cluster count.
pub struct ChainIter<'a> {
    start: ClusterIdx,
    state: IterState,
    visited: usize,
    fat_table: FatTable<'a>,
}

enum IterState {
    At(ClusterIdx),
    /// The walk cannot continue, the error is yielded once.
    Broken(ChainError),
    Done,
}

impl<'a> ChainIter<'a> {
    pub fn new(first_cluster: ClusterIdx, fat_table: FatTable<'a>) -> Self {
        let state = if first_cluster == NO_CLUSTER {
            // a file without data
            IterState::Done
        } else if fat_table.is_data_cluster(first_cluster) {
            IterState::At(first_cluster)
        } else {
            IterState::Broken(ChainError::InvalidStart { start: first_cluster })
        };
        Self { start: first_cluster, state, visited: 0, fat_table }
    }
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = Result<ClusterIdx, ChainError>;
    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, IterState::Done) {
            IterState::Done => None,
            IterState::Broken(error) => Some(Err(error)),
            IterState::At(current) => {
                let limit = self.fat_table.chain_limit();
                if self.visited >= limit {
                    return Some(Err(ChainError::Unterminated { start: self.start, limit }));
                }
                self.visited += 1;

                let entry = self.fat_table.get(current);
                if !entry.is_chain_end() {
                    self.state = match entry.next_cluster(self.fat_table.cluster_end()) {
                        Some(next) => IterState::At(next),
                        None => IterState::Broken(ChainError::OutOfRange { cluster: current, next: entry }),
                    };
                }
                Some(Ok(current))
            }
        }
    }
}
