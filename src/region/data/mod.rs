pub(crate) mod entry_type;
pub(crate) mod entryset;
pub(crate) mod short;

use super::Plain;
use crate::endian::Little as LE;
use entry_type::RawEntryType;

#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct AllocationBitmap {
    pub entry_type: RawEntryType,
    pub bitmap_flags: u8,
    _reserved: [u8; 18],
    pub first_cluster: LE<u32>,
    pub data_length: LE<u64>,
}

unsafe impl Plain for AllocationBitmap {}

#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct UpcaseTable {
    pub entry_type: RawEntryType,
    _reserved1: [u8; 3],
    pub table_checksum: LE<u32>,
    _reserved2: [u8; 12],
    pub first_cluster: LE<u32>,
    pub data_length: LE<u64>,
}

unsafe impl Plain for UpcaseTable {}

#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct VolumeLabel {
    pub entry_type: RawEntryType,
    pub character_count: u8,
    pub volume_label: [LE<u16>; 11],
    _reserved: [u8; 8],
}

unsafe impl Plain for VolumeLabel {}

impl From<VolumeLabel> for heapless::String<44> {
    fn from(label: VolumeLabel) -> heapless::String<44> {
        let mut string = heapless::String::new();
        let count = core::cmp::min(label.character_count as usize, 11);
        let units = label.volume_label;
        let units = units[..count].iter().map(|unit| unit.to_ne());
        for ch in char::decode_utf16(units) {
            string.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER)).ok();
        }
        string
    }
}

/// Upcase table checksum
#[derive(Default, Debug)]
pub(crate) struct Checksum(u32);

impl Checksum {
    pub fn write(&mut self, bytes: &[u8]) {
        let mut sum = self.0;
        for &b in bytes.iter() {
            sum = ((sum & 1) << 31).wrapping_add(sum >> 1).wrapping_add(b as u32);
        }
        self.0 = sum;
    }

    pub fn sum(&self) -> u32 {
        self.0
    }
}
