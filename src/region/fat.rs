use crate::geometry::FatType;
use crate::types::ClusterID;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Entry {
    Free,
    Next(ClusterID),
    BadCluster,
    Last,
    /// Value 1 or reserved range, never valid inside a chain
    Reserved(u32),
}

impl Entry {
    pub fn decode(fat_type: FatType, value: u32) -> Self {
        let (value, bad) = match fat_type {
            FatType::Fat12 => (value & 0xFFF, 0xFF7),
            FatType::Fat16 => (value & 0xFFFF, 0xFFF7),
            FatType::Fat32 => (value & 0x0FFFFFFF, 0x0FFFFFF7),
            FatType::ExFat => (value, 0xFFFFFFF7),
        };
        match value {
            0 => Self::Free,
            _ if value == bad => Self::BadCluster,
            _ if fat_type == FatType::ExFat && value == 0xFFFFFFFF => Self::Last,
            _ if fat_type != FatType::ExFat && value > bad => Self::Last,
            _ if value >= 2 && value < bad => Self::Next(value.into()),
            _ => Self::Reserved(value),
        }
    }

    pub fn encode(self, fat_type: FatType) -> u32 {
        let last = match fat_type {
            FatType::Fat12 => 0xFFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFFFFFF,
            FatType::ExFat => 0xFFFFFFFF,
        };
        match self {
            Self::Free => 0,
            Self::Next(cluster) => cluster.into(),
            Self::BadCluster => last - 8,
            Self::Last => last,
            Self::Reserved(value) => value,
        }
    }
}
