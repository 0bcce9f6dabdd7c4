use std::fmt::{self, Display, Formatter};

use crate::fat::{ClusterIdx, FIRST_DATA_CLUSTER};

/// The raw 12-bit value of an allocation table entry.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[repr(transparent)]
pub struct FatEntry(u16);

impl FatEntry {
    pub const FREE: Self = Self(0x000);
    /// The end-of-chain marker written by repairs. Any value from `0xFF8` up is read as end-of-chain.
    pub const END_OF_CHAIN: Self = Self(0xFF8);

    const MASK: u16 = 0x0FFF;
    const FIRST_RESERVED: u16 = 0xFF0;

    /// Keeps only the low 12 bits of `value`.
    pub const fn new(value: u16) -> Self {
        Self(value & Self::MASK)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// True if `self.0` is a special value representing a free cluster.
    pub fn is_free(self) -> bool {
        self == Self::FREE
    }

    /// Any non-free value counts as allocated, whether it is a valid link, a marker or garbage.
    pub fn is_allocated(self) -> bool {
        !self.is_free()
    }

    /// True if `self.0` is a special value representing the end of a chain.
    pub fn is_chain_end(self) -> bool {
        self.0 >= Self::END_OF_CHAIN.0
    }

    /// Returns the next cluster of the chain if this entry links to a data cluster below `cluster_end`.
    pub fn next_cluster(self, cluster_end: ClusterIdx) -> Option<ClusterIdx> {
        (FIRST_DATA_CLUSTER..cluster_end.min(Self::FIRST_RESERVED))
            .contains(&self.0)
            .then(|| self.0)
    }
}

impl Display for FatEntry {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "{:#05x}", self.0)
    }
}
