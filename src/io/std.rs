use std::fs;
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::Path;

use crate::types::SectorID;

/// Disk image backed block device
#[derive(Debug)]
pub struct FileIO {
    file: fs::File,
    sector_size_shift: u8,
    num_sectors: u64,
}

impl FileIO {
    pub fn open<P: AsRef<Path>>(filepath: P) -> std::io::Result<Self> {
        Self::open_with_sector_size_shift(filepath, 9)
    }

    pub fn open_with_sector_size_shift<P: AsRef<Path>>(
        filepath: P,
        sector_size_shift: u8,
    ) -> std::io::Result<Self> {
        let file = fs::File::options().read(true).write(true).open(filepath)?;
        let num_sectors = file.metadata()?.len() >> sector_size_shift;
        Ok(Self { file, sector_size_shift, num_sectors })
    }
}

impl super::BlockDevice for FileIO {
    type Error = std::io::Error;

    fn sector_size_shift(&self) -> u8 {
        self.sector_size_shift
    }

    fn num_sectors(&self) -> u64 {
        self.num_sectors
    }

    fn read(&mut self, sector: SectorID, buf: &mut [u8]) -> Result<(), Self::Error> {
        let seek = SeekFrom::Start(u64::from(sector) << self.sector_size_shift);
        self.file.seek(seek)?;
        self.file.read_exact(buf)
    }

    fn write(&mut self, sector: SectorID, buf: &[u8]) -> Result<(), Self::Error> {
        let seek = SeekFrom::Start(u64::from(sector) << self.sector_size_shift);
        self.file.seek(seek)?;
        self.file.write_all(buf)
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        self.file.flush()?;
        self.file.sync_data()
    }
}
