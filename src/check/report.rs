use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use thiserror::Error;

use crate::fat::{ChainError, ClusterIdx, CreateError, WalkError};

/// Corruption that a pass detected but did not repair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Anomaly {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error("{path}: {source}")]
    BrokenChain { path: String, source: ChainError },
    #[error("lost run starting at cluster {start} has no end-of-chain marker before the end of the volume")]
    UnterminatedLostRun { start: ClusterIdx },
    #[error("lost chain starting at cluster {start} is not recoverable: {source}")]
    BrokenLostChain { start: ClusterIdx, source: ChainError },
    #[error("lost chain starting at cluster {start} runs into cluster {cluster}, which belongs to another chain")]
    CrossLinkedLostChain { start: ClusterIdx, cluster: ClusterIdx },
    #[error("{count} lost clusters starting at cluster {first} do not belong to any terminated chain")]
    HeadlessLostClusters { first: ClusterIdx, count: usize },
    #[error("cannot recover lost chain starting at cluster {start}: all found<N>.dat names are taken")]
    NoFreeFileName { start: ClusterIdx },
    #[error("cannot recover lost chain starting at cluster {start}: {source}")]
    RecoveryFailed { start: ClusterIdx, source: CreateError },
    #[error("lost chains not recovered, {unreferenced} unreferenced clusters may belong to unread directories")]
    RecoverySkipped { unreferenced: usize },
}

/// A lost chain that was turned into a file in the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostFile {
    pub first_cluster: ClusterIdx,
    pub cluster_count: u32,
    /// in bytes
    pub size: u32,
    pub file_name: String,
}

impl Display for LostFile {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "Lost file: {} {}", self.first_cluster, self.cluster_count)
    }
}

/// A file whose declared size did not match the length of its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthMismatch {
    /// `NAME.EXT`, padding removed
    pub name: String,
    pub path: String,
    pub declared_size: u32,
    /// Length of the chain after the repair, in bytes
    pub actual_size: u32,
}

impl Display for LengthMismatch {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "{} {} {}", self.name, self.declared_size, self.actual_size)
    }
}

/// The findings of all passes. `Display` renders the regular report, one finding per line, in pass order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub unreferenced: Vec<ClusterIdx>,
    pub lost_files: Vec<LostFile>,
    pub length_mismatches: Vec<LengthMismatch>,
    pub anomalies: Vec<Anomaly>,
}

impl Report {
    /// True if no pass found anything, anomalies included.
    pub fn is_clean(&self) -> bool {
        self.unreferenced.is_empty()
            && self.lost_files.is_empty()
            && self.length_mismatches.is_empty()
            && self.anomalies.is_empty()
    }

    /// Both tree walks run into the same corruption, so anomalies already reported are skipped.
    pub fn add_anomalies(&mut self, anomalies: Vec<Anomaly>) {
        for anomaly in anomalies {
            if !self.anomalies.contains(&anomaly) {
                self.anomalies.push(anomaly);
            }
        }
    }
}

impl Display for Report {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        if !self.unreferenced.is_empty() {
            writeln!(formatter, "Unreferenced: {}", self.unreferenced.iter().join(" "))?;
        }
        for lost_file in &self.lost_files {
            writeln!(formatter, "{}", lost_file)?;
        }
        for mismatch in &self.length_mismatches {
            writeln!(formatter, "{}", mismatch)?;
        }
        Ok(())
    }
}
