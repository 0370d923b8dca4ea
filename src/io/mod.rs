pub mod mem;
#[cfg(feature = "std")]
pub mod std;

use core::fmt::Debug;

use crate::types::SectorID;

/// Sector addressed storage, e.g. SD card, eMMC or a disk image
///
/// Timeout and retry policy belongs to the implementor,
/// the filesystem only sees success or failure.
pub trait BlockDevice {
    type Error: Debug;

    /// Default to 9, which means 512B
    fn sector_size_shift(&self) -> u8 {
        9
    }
    fn num_sectors(&self) -> u64;
    /// Caller guarantees buf.len() == sector size
    fn read(&mut self, id: SectorID, buf: &mut [u8]) -> Result<(), Self::Error>;
    /// Caller guarantees data.len() == sector size
    fn write(&mut self, id: SectorID, data: &[u8]) -> Result<(), Self::Error>;
    fn is_busy(&mut self) -> bool {
        false
    }
    fn sync(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<T: BlockDevice> BlockDevice for &mut T {
    type Error = T::Error;

    fn sector_size_shift(&self) -> u8 {
        (**self).sector_size_shift()
    }

    fn num_sectors(&self) -> u64 {
        (**self).num_sectors()
    }

    fn read(&mut self, id: SectorID, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(id, buf)
    }

    fn write(&mut self, id: SectorID, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(id, data)
    }

    fn is_busy(&mut self) -> bool {
        (**self).is_busy()
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        (**self).sync()
    }
}
