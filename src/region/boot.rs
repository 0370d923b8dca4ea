use bitfield::bitfield;
use hex_literal::hex;

use super::Plain;
use crate::endian::Little as LE;

pub(crate) const SIGNATURE: [u8; 2] = hex!("55 AA");
pub(crate) const SIGNATURE_OFFSET: usize = 510;

pub(crate) fn has_signature(sector: &[u8]) -> bool {
    sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] == SIGNATURE
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default)]
    pub struct VolumeFlags(u16);
    pub media_failure, set_media_failure: 2;
    pub volume_dirty, set_volume_dirty: 1;
    pub active_fat, set_active_fat: 0;
}

/// exFAT main boot sector
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub(crate) struct BootSector {
    pub jump_boot: [u8; 3],
    pub filesystem_name: [u8; 8],
    _must_be_zero: [u8; 53],
    pub partition_offset: LE<u64>, // shall ignore when 0
    pub volume_length: LE<u64>,
    pub fat_offset: LE<u32>,          // unit sector
    pub fat_length: LE<u32>,          // unit sector
    pub cluster_heap_offset: LE<u32>, // unit sector
    pub cluster_count: LE<u32>,
    pub first_cluster_of_root_directory: LE<u32>,
    pub volume_serial_number: LE<u32>,
    pub filesystem_revision: LE<u16>,
    pub volume_flags: LE<u16>,
    pub bytes_per_sector_shift: u8, // [9..=12]
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
    pub drive_select: u8,
    pub percent_inuse: u8,
    _reserved: [u8; 7],
    pub bootcode: [u8; 390],
    pub boot_signature: [u8; 2],
}

unsafe impl Plain for BootSector {}

impl BootSector {
    pub fn is_exfat(&self) -> bool {
        self.jump_boot == hex!("EB 76 90") && &self.filesystem_name == b"EXFAT   "
    }
}

/// Checksum over boot sector 0..=10, volume flags and percent in use excluded
#[derive(Default, Debug)]
pub(crate) struct BootChecksum(u32);

impl BootChecksum {
    pub fn write(&mut self, index: usize, sector: &[u8]) {
        let mut sum = self.0;
        for (i, &byte) in sector.iter().enumerate() {
            match (index, i) {
                (0, 106 | 107 | 112) => continue,
                _ => sum = ((sum & 1) << 31).wrapping_add(sum >> 1).wrapping_add(byte as u32),
            }
        }
        self.0 = sum;
    }

    pub fn sum(&self) -> u32 {
        self.0
    }
}

/// FAT12/16/32 common BIOS parameter block, first 36 bytes of boot sector
#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct BiosParameterBlock {
    pub jump_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: LE<u16>,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: LE<u16>,
    pub number_of_fats: u8,
    pub root_entry_count: LE<u16>,
    pub total_sectors_16: LE<u16>,
    pub media: u8,
    pub fat_size_16: LE<u16>,
    pub sectors_per_track: LE<u16>,
    pub number_of_heads: LE<u16>,
    pub hidden_sectors: LE<u32>,
    pub total_sectors_32: LE<u32>,
}

unsafe impl Plain for BiosParameterBlock {}

impl BiosParameterBlock {
    pub const EXTENSION_OFFSET: usize = 36;

    /// Loose check used for detection, full validation happens on mount
    pub fn is_fat(&self) -> bool {
        let jump = self.jump_boot[0] == 0xEB || self.jump_boot[0] == 0xE9;
        let bytes_per_sector = self.bytes_per_sector.to_ne();
        jump && bytes_per_sector.is_power_of_two()
            && (512..=4096).contains(&bytes_per_sector)
            && self.sectors_per_cluster.is_power_of_two()
            && self.number_of_fats > 0
    }

    pub fn total_sectors(&self) -> u32 {
        match self.total_sectors_16.to_ne() {
            0 => self.total_sectors_32.to_ne(),
            n => n as u32,
        }
    }
}

/// FAT12/FAT16 extended boot record, starts at offset 36
#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct Fat16Extension {
    pub drive_number: u8,
    _reserved: u8,
    pub boot_signature: u8,
    pub volume_id: LE<u32>,
    pub volume_label: [u8; 11],
    pub filesystem_type: [u8; 8],
}

unsafe impl Plain for Fat16Extension {}

/// FAT32 extended boot record, starts at offset 36
#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct Fat32Extension {
    pub fat_size_32: LE<u32>,
    pub ext_flags: LE<u16>,
    pub filesystem_version: LE<u16>,
    pub root_cluster: LE<u32>,
    pub fs_info: LE<u16>,
    pub backup_boot_sector: LE<u16>,
    _reserved: [u8; 12],
    pub drive_number: u8,
    _reserved1: u8,
    pub boot_signature: u8,
    pub volume_id: LE<u32>,
    pub volume_label: [u8; 11],
    pub filesystem_type: [u8; 8],
}

unsafe impl Plain for Fat32Extension {}

bitfield! {
    #[derive(Copy, Clone, Debug, Default)]
    pub struct ExtFlags(u16);
    pub mirroring_disabled, _: 7;
    pub active_fat, _: 3, 0;
}

impl Fat32Extension {
    pub fn ext_flags(&self) -> ExtFlags {
        ExtFlags(self.ext_flags.to_ne())
    }
}

/// FAT32 FSInfo sector, free count and next free are hints only
#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct FsInfo {
    pub lead_signature: LE<u32>,
    _reserved1: [u8; 480],
    pub struct_signature: LE<u32>,
    pub free_count: LE<u32>,
    pub next_free: LE<u32>,
    _reserved2: [u8; 12],
    pub trail_signature: LE<u32>,
}

unsafe impl Plain for FsInfo {}

impl FsInfo {
    const LEAD_SIGNATURE: u32 = 0x41615252;
    const STRUCT_SIGNATURE: u32 = 0x61417272;
    const TRAIL_SIGNATURE: u32 = 0xAA550000;
    pub const UNKNOWN: u32 = 0xFFFFFFFF;

    pub fn new(free_count: u32, next_free: u32) -> Self {
        Self {
            lead_signature: Self::LEAD_SIGNATURE.into(),
            _reserved1: [0; 480],
            struct_signature: Self::STRUCT_SIGNATURE.into(),
            free_count: free_count.into(),
            next_free: next_free.into(),
            _reserved2: [0; 12],
            trail_signature: Self::TRAIL_SIGNATURE.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lead_signature.to_ne() == Self::LEAD_SIGNATURE
            && self.struct_signature.to_ne() == Self::STRUCT_SIGNATURE
            && self.trail_signature.to_ne() == Self::TRAIL_SIGNATURE
    }
}

/// Master boot record partition table entry
#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct PartitionEntry {
    pub boot_indicator: u8,
    _chs_start: [u8; 3],
    pub partition_type: u8,
    _chs_end: [u8; 3],
    pub relative_sector: LE<u32>,
    pub total_sectors: LE<u32>,
}

unsafe impl Plain for PartitionEntry {}

impl PartitionEntry {
    pub const TABLE_OFFSET: usize = 446;
    pub const SIZE: usize = 16;

    /// Primary partition 1..=4
    pub fn read(sector: &[u8], index: u8) -> Option<Self> {
        if !(1..=4).contains(&index) {
            return None;
        }
        let offset = Self::TABLE_OFFSET + (index as usize - 1) * Self::SIZE;
        Some(super::read(&sector[offset..]))
    }

    pub fn is_valid(&self) -> bool {
        (self.boot_indicator == 0 || self.boot_indicator == 0x80)
            && self.partition_type != 0
            && self.total_sectors.to_ne() > 0
    }
}
