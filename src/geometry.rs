use core::fmt::Display;

use crate::types::{ClusterID, SectorID};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
    ExFat,
}

impl FatType {
    /// FAT entry width in bits
    pub fn entry_bits(&self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 | Self::ExFat => 32,
        }
    }

    /// FAT12/FAT16 determined by cluster count, FAT32 is determined by BPB layout
    pub(crate) fn from_cluster_count(cluster_count: u32) -> Option<Self> {
        match cluster_count {
            0..=4084 => Some(Self::Fat12),
            4085..=65524 => Some(Self::Fat16),
            _ => None,
        }
    }
}

impl Display for FatType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Fat12 => "FAT12",
            Self::Fat16 => "FAT16",
            Self::Fat32 => "FAT32",
            Self::ExFat => "exFAT",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootLocation {
    /// FAT12/FAT16 fixed root directory region
    Region { sector: SectorID, entries: u16 },
    /// FAT32 and exFAT root directory cluster chain
    Cluster(ClusterID),
}

/// Read-only once mounted, all sector numbers are absolute on the device
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    pub fat_type: FatType,
    pub sector_size_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub volume_offset: SectorID,
    pub volume_length: u64,
    pub fat_offset: SectorID,
    pub fat_length: u32,
    pub fat_count: u8,
    pub heap_offset: SectorID,
    pub cluster_count: u32,
    pub root: RootLocation,
    pub serial_number: u32,
}

impl Geometry {
    pub fn sector_size(&self) -> u32 {
        1 << self.sector_size_shift
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_shift
    }

    pub fn cluster_size_shift(&self) -> u8 {
        self.sector_size_shift + self.sectors_per_cluster_shift
    }

    pub fn cluster_size(&self) -> u32 {
        1 << self.cluster_size_shift()
    }

    pub fn last_cluster(&self) -> ClusterID {
        ClusterID::FIRST + (self.cluster_count - 1)
    }

    pub fn contains(&self, cluster: ClusterID) -> bool {
        cluster.valid() && cluster <= self.last_cluster()
    }

    pub fn cluster_sector(&self, cluster: ClusterID) -> SectorID {
        self.heap_offset + ((cluster.offset() as u64) << self.sectors_per_cluster_shift)
    }

    /// Number of clusters needed to hold `length` bytes
    pub fn clusters_for(&self, length: u64) -> u64 {
        let cluster_size = self.cluster_size() as u64;
        (length + cluster_size - 1) >> self.cluster_size_shift()
    }
}
