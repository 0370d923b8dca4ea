use alloc::vec;
use alloc::vec::Vec;

use displaydoc::Display;

use crate::types::SectorID;

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum MemError {
    /// Sector {0} out of range
    OutOfRange(SectorID),
}

/// RAM disk
#[derive(Clone, Debug)]
pub struct MemIO {
    data: Vec<u8>,
    sector_size_shift: u8,
}

impl MemIO {
    pub fn new(num_sectors: u64, sector_size_shift: u8) -> Self {
        Self { data: vec![0; (num_sectors << sector_size_shift) as usize], sector_size_shift }
    }

    pub fn from_vec(data: Vec<u8>, sector_size_shift: u8) -> Self {
        Self { data, sector_size_shift }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, id: SectorID) -> Result<core::ops::Range<usize>, MemError> {
        let start = u64::from(id) << self.sector_size_shift;
        let end = start + (1 << self.sector_size_shift);
        if end > self.data.len() as u64 {
            return Err(MemError::OutOfRange(id));
        }
        Ok(start as usize..end as usize)
    }
}

impl super::BlockDevice for MemIO {
    type Error = MemError;

    fn sector_size_shift(&self) -> u8 {
        self.sector_size_shift
    }

    fn num_sectors(&self) -> u64 {
        self.data.len() as u64 >> self.sector_size_shift
    }

    fn read(&mut self, id: SectorID, buf: &mut [u8]) -> Result<(), MemError> {
        let range = self.range(id)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, id: SectorID, data: &[u8]) -> Result<(), MemError> {
        let range = self.range(id)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }
}
