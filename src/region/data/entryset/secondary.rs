use core::fmt::Debug;

use super::super::entry_type::{EntryType, RawEntryType};
use super::generic::Flags;
use crate::endian::Little as LE;
use crate::region::Plain;

#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct Secondary<T: Copy + Debug> {
    pub(crate) entry_type: RawEntryType,
    general_secondary_flags: u8,
    pub(crate) custom_defined: T,
    pub(crate) first_cluster: LE<u32>,
    pub(crate) data_length: LE<u64>,
}

unsafe impl Plain for Secondary<StreamExtension> {}

impl<T: Copy + Debug> Secondary<T> {
    pub(crate) fn general_secondary_flags(&self) -> Flags {
        Flags(self.general_secondary_flags)
    }

    pub(crate) fn set_general_secondary_flags(&mut self, flags: Flags) {
        self.general_secondary_flags = flags.0
    }

    pub fn data_length(&self) -> u64 {
        self.data_length.to_ne()
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct StreamExtension {
    _reserved1: u8,
    pub name_length: u8,
    pub name_hash: LE<u16>,
    _reserved2: [u8; 2],
    pub valid_data_length: LE<u64>,
    _reserved3: [u8; 4],
}

impl Secondary<StreamExtension> {
    pub(crate) fn new(name_length: u8, name_hash: u16) -> Self {
        let mut flags = Flags::default();
        flags.set_allocation_possible(true);
        Self {
            entry_type: RawEntryType::new(EntryType::StreamExtension, true),
            general_secondary_flags: flags.0,
            custom_defined: StreamExtension {
                _reserved1: 0,
                name_length,
                name_hash: name_hash.into(),
                _reserved2: [0; 2],
                valid_data_length: 0u64.into(),
                _reserved3: [0; 4],
            },
            first_cluster: 0u32.into(),
            data_length: 0u64.into(),
        }
    }

    pub fn valid_data_length(&self) -> u64 {
        let stream_extension = self.custom_defined;
        stream_extension.valid_data_length.to_ne()
    }
}

#[derive(Copy, Clone, Debug)]
#[repr(C, packed(1))]
pub(crate) struct Filename {
    pub entry_type: RawEntryType,
    general_secondary_flags: u8,
    pub filename: [LE<u16>; 15],
}

unsafe impl Plain for Filename {}

impl Filename {
    pub const CHARACTERS: usize = 15;

    pub(crate) fn new(units: &[u16]) -> Self {
        let mut filename = [LE::<u16>::default(); 15];
        for (i, &unit) in units.iter().take(Self::CHARACTERS).enumerate() {
            filename[i] = unit.into();
        }
        let entry_type = RawEntryType::new(EntryType::Filename, true);
        Self { entry_type, general_secondary_flags: 0, filename }
    }
}
