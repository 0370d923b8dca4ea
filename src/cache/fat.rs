use super::{Intent, SectorCache};
use crate::error::Error;
use crate::geometry::{FatType, Geometry};
use crate::io::BlockDevice;
use crate::region::fat::Entry;
use crate::types::{ClusterID, SectorID};

/// FAT region accessor on top of a dedicated sector cache,
/// each FAT sector written back to all mirrors at once
pub(crate) struct FatCache {
    cache: SectorCache,
    fat_type: FatType,
    offset: SectorID,
    length: u32,
    sector_size_shift: u8,
}

impl FatCache {
    pub fn new(geometry: &Geometry, depth: usize, copies: u8) -> Self {
        let sector_size = geometry.sector_size() as usize;
        let stride = geometry.fat_length;
        Self {
            cache: SectorCache::mirrored(depth, sector_size, copies, stride),
            fat_type: geometry.fat_type,
            offset: geometry.fat_offset,
            length: geometry.fat_length,
            sector_size_shift: geometry.sector_size_shift,
        }
    }

    fn sector_size(&self) -> usize {
        1 << self.sector_size_shift
    }

    /// Byte offset of FAT entry to (sector, offset within sector)
    fn locate(&self, byte_offset: u64) -> (SectorID, usize) {
        let sector = self.offset + (byte_offset >> self.sector_size_shift);
        (sector, (byte_offset as usize) & (self.sector_size() - 1))
    }

    /// Sector after `sector` and byte offset 0, or same sector and next byte
    fn next_byte(&self, sector: SectorID, offset: usize) -> (SectorID, usize) {
        match offset + 1 < self.sector_size() {
            true => (sector, offset + 1),
            false => (sector + 1u32, 0),
        }
    }

    fn byte_offset(&self, cluster: ClusterID) -> u64 {
        let index = u32::from(cluster) as u64;
        match self.fat_type {
            FatType::Fat12 => index + index / 2,
            FatType::Fat16 => index * 2,
            FatType::Fat32 | FatType::ExFat => index * 4,
        }
    }

    fn read_raw<D: BlockDevice>(
        &mut self,
        io: &mut D,
        cluster: ClusterID,
    ) -> Result<u32, Error<D::Error>> {
        let (sector, offset) = self.locate(self.byte_offset(cluster));
        let value = match self.fat_type {
            FatType::Fat12 => {
                let low = self.cache.fetch(io, sector)?[offset];
                let (sector, offset) = self.next_byte(sector, offset);
                let high = self.cache.fetch(io, sector)?[offset];
                let value = u16::from_le_bytes([low, high]);
                let value = match u32::from(cluster) & 1 {
                    1 => value >> 4,
                    _ => value & 0xFFF,
                };
                value.into()
            }
            FatType::Fat16 => {
                let bytes = self.cache.fetch(io, sector)?;
                u16::from_le_bytes([bytes[offset], bytes[offset + 1]]).into()
            }
            FatType::Fat32 | FatType::ExFat => {
                let bytes = self.cache.fetch(io, sector)?;
                let array =
                    [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
                u32::from_le_bytes(array)
            }
        };
        Ok(value)
    }

    pub fn get<D: BlockDevice>(
        &mut self,
        io: &mut D,
        cluster: ClusterID,
    ) -> Result<Entry, Error<D::Error>> {
        let value = self.read_raw(io, cluster)?;
        Ok(Entry::decode(self.fat_type, value))
    }

    pub fn set<D: BlockDevice>(
        &mut self,
        io: &mut D,
        cluster: ClusterID,
        entry: Entry,
    ) -> Result<(), Error<D::Error>> {
        trace!("Set FAT entry of cluster {} to {:?}", cluster, entry);
        let value = entry.encode(self.fat_type);
        let (sector, offset) = self.locate(self.byte_offset(cluster));
        match self.fat_type {
            FatType::Fat12 => {
                let odd = u32::from(cluster) & 1 == 1;
                let value = (value & 0xFFF) as u16;
                let bytes = self.cache.fetch_mut(io, sector, Intent::Update)?;
                bytes[offset] = match odd {
                    true => (bytes[offset] & 0x0F) | (value << 4) as u8,
                    false => value as u8,
                };
                let (sector, offset) = self.next_byte(sector, offset);
                let bytes = self.cache.fetch_mut(io, sector, Intent::Update)?;
                bytes[offset] = match odd {
                    true => (value >> 4) as u8,
                    false => (bytes[offset] & 0xF0) | (value >> 8) as u8,
                };
            }
            FatType::Fat16 => {
                let bytes = self.cache.fetch_mut(io, sector, Intent::Update)?;
                bytes[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            FatType::Fat32 => {
                let bytes = self.cache.fetch_mut(io, sector, Intent::Update)?;
                let array =
                    [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
                // Upper 4 bits reserved
                let value = (u32::from_le_bytes(array) & 0xF0000000) | (value & 0x0FFFFFFF);
                bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }
            FatType::ExFat => {
                let bytes = self.cache.fetch_mut(io, sector, Intent::Update)?;
                bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Count free entries of cluster 2 ..= cluster_count + 1
    pub fn count_free<D: BlockDevice>(
        &mut self,
        io: &mut D,
        cluster_count: u32,
    ) -> Result<u32, Error<D::Error>> {
        let end = cluster_count + 2;
        let mut free = 0;
        if self.fat_type == FatType::Fat12 {
            for index in 2..end {
                if self.get(io, index.into())? == Entry::Free {
                    free += 1;
                }
            }
            return Ok(free);
        }
        let width = (self.fat_type.entry_bits() / 8) as usize;
        let per_sector = (self.sector_size() / width) as u32;
        let mut index = 2;
        while index < end {
            let first = index % per_sector;
            let last = core::cmp::min(per_sector, first + (end - index));
            let sector = self.offset + index / per_sector;
            let bytes = self.cache.fetch(io, sector)?;
            for i in first as usize..last as usize {
                let value = match width {
                    2 => u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as u32,
                    _ => u32::from_le_bytes([
                        bytes[i * 4],
                        bytes[i * 4 + 1],
                        bytes[i * 4 + 2],
                        bytes[i * 4 + 3],
                    ]),
                };
                if Entry::decode(self.fat_type, value) == Entry::Free {
                    free += 1;
                }
            }
            index += last - first;
        }
        Ok(free)
    }

    /// Zero the whole FAT, all copies included
    pub fn clear<D: BlockDevice>(&mut self, io: &mut D) -> Result<(), Error<D::Error>> {
        self.cache.invalidate_all();
        for i in 0..self.length {
            self.cache.fetch_mut(io, self.offset + i, Intent::Overwrite)?;
        }
        self.cache.flush_all(io)
    }

    pub fn flush_all<D: BlockDevice>(&mut self, io: &mut D) -> Result<(), Error<D::Error>> {
        self.cache.flush_all(io)
    }

    pub fn invalidate_all(&mut self) {
        self.cache.invalidate_all()
    }
}
