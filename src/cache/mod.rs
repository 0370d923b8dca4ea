//! Write-back sector caches
//!
//! Every sector the filesystem touches goes through a [`SectorCache`],
//! so FAT entries, directory entries, the allocation bitmap and file data
//! never have two diverging copies in memory.

pub(crate) mod fat;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::error::Error;
use crate::io::BlockDevice;
use crate::types::SectorID;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Read sector content from device on miss, then modify part of it
    Update,
    /// Whole sector will be rewritten, no device read on miss
    Overwrite,
}

struct Slot {
    sector: Option<SectorID>,
    buffer: Box<[u8]>,
    dirty: bool,
    last_used: u64,
}

pub struct SectorCache {
    slots: Vec<Slot>,
    depth: usize,
    sector_size: usize,
    /// Number of copies each sector is written to, FAT mirrors included
    copies: u8,
    /// Distance in sectors between two copies
    stride: u32,
    tick: u64,
}

impl SectorCache {
    pub fn new(depth: usize, sector_size: usize) -> Self {
        Self::mirrored(depth, sector_size, 1, 0)
    }

    pub fn mirrored(depth: usize, sector_size: usize, copies: u8, stride: u32) -> Self {
        let depth = core::cmp::max(depth, 1);
        let copies = core::cmp::max(copies, 1);
        Self { slots: Vec::with_capacity(depth), depth, sector_size, copies, stride, tick: 0 }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of slots currently allocated, never exceeds depth
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.slots.iter().any(|slot| slot.dirty)
    }

    pub fn contains(&self, id: SectorID) -> bool {
        self.lookup(id).is_some()
    }

    fn lookup(&self, id: SectorID) -> Option<usize> {
        self.slots.iter().position(|slot| slot.sector == Some(id))
    }

    fn touch(&mut self, index: usize) {
        self.tick += 1;
        self.slots[index].last_used = self.tick;
    }

    /// Empty slot first, then least recently used clean slot,
    /// least recently used dirty slot at last
    fn victim(&self) -> usize {
        let key = |slot: &Slot| (slot.sector.is_some(), slot.dirty, slot.last_used);
        let iter = self.slots.iter().enumerate();
        iter.min_by_key(|(_, slot)| key(slot)).map(|(index, _)| index).unwrap_or(0)
    }

    fn write_back<D: BlockDevice>(
        &mut self,
        io: &mut D,
        index: usize,
    ) -> Result<(), Error<D::Error>> {
        let slot = &mut self.slots[index];
        let sector = match (slot.sector, slot.dirty) {
            (Some(sector), true) => sector,
            _ => return Ok(()),
        };
        for copy in 0..self.copies as u32 {
            let id = sector + copy as u64 * self.stride as u64;
            if let Err(e) = io.write(id, &slot.buffer) {
                warn!("Write back sector {} failed: {:?}", id, e);
                return Err(Error::IO(e));
            }
        }
        trace!("Sector {} written back", sector);
        slot.dirty = false;
        Ok(())
    }

    fn load<D: BlockDevice>(
        &mut self,
        io: &mut D,
        id: SectorID,
        read: bool,
    ) -> Result<usize, Error<D::Error>> {
        if let Some(index) = self.lookup(id) {
            self.touch(index);
            return Ok(index);
        }
        let index = match self.slots.len() < self.depth {
            true => {
                let buffer = vec![0u8; self.sector_size].into_boxed_slice();
                self.slots.push(Slot { sector: None, buffer, dirty: false, last_used: 0 });
                self.slots.len() - 1
            }
            false => self.victim(),
        };
        self.write_back(io, index)?;
        let slot = &mut self.slots[index];
        if let Some(evicted) = slot.sector.take() {
            trace!("Evict sector {} for sector {}", evicted, id);
        }
        match read {
            true => io.read(id, &mut slot.buffer).map_err(Error::IO)?,
            false => slot.buffer.fill(0),
        }
        slot.sector = Some(id);
        self.touch(index);
        Ok(index)
    }

    /// Sector content for reading, loaded from device on miss
    pub fn fetch<D: BlockDevice>(
        &mut self,
        io: &mut D,
        id: SectorID,
    ) -> Result<&[u8], Error<D::Error>> {
        let index = self.load(io, id, true)?;
        Ok(&self.slots[index].buffer)
    }

    /// Sector content for writing, slot is marked dirty
    pub fn fetch_mut<D: BlockDevice>(
        &mut self,
        io: &mut D,
        id: SectorID,
        intent: Intent,
    ) -> Result<&mut [u8], Error<D::Error>> {
        let index = self.load(io, id, intent == Intent::Update)?;
        let slot = &mut self.slots[index];
        slot.dirty = true;
        Ok(&mut slot.buffer)
    }

    /// Returns false if sector not cached
    pub fn mark_dirty(&mut self, id: SectorID) -> bool {
        match self.lookup(id) {
            Some(index) => {
                self.slots[index].dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn flush<D: BlockDevice>(
        &mut self,
        io: &mut D,
        id: SectorID,
    ) -> Result<(), Error<D::Error>> {
        match self.lookup(id) {
            Some(index) => self.write_back(io, index),
            None => Ok(()),
        }
    }

    /// Writes back every dirty slot, stops at first failure leaving remaining slots dirty
    pub fn flush_all<D: BlockDevice>(&mut self, io: &mut D) -> Result<(), Error<D::Error>> {
        let mut dirty: Vec<(SectorID, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.sector.filter(|_| slot.dirty).map(|id| (id, index)))
            .collect();
        dirty.sort_unstable();
        for (_, index) in dirty {
            self.write_back(io, index)?;
        }
        Ok(())
    }

    /// Discard cached content without writing back
    pub fn invalidate(&mut self, id: SectorID) {
        if let Some(index) = self.lookup(id) {
            let slot = &mut self.slots[index];
            if slot.dirty {
                debug!("Discard dirty sector {}", id);
            }
            slot.sector = None;
            slot.dirty = false;
        }
    }

    pub fn invalidate_all(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.sector = None;
            slot.dirty = false;
        }
    }
}

impl Debug for SectorCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sectors = self.slots.iter().map(|slot| (slot.sector, slot.dirty));
        f.debug_list().entries(sectors).finish()
    }
}
