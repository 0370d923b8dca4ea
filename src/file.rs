use core::fmt::Debug;

use crate::cache::Intent;
use crate::error::{DataError, Error, InputError};
use crate::geometry::FatType;
use crate::io::BlockDevice;
use crate::partition::{DirEntry, Partition};
use crate::region::data::entryset::primary::DateTime;
use crate::sync::{acquire, Shared};
use crate::types::ClusterID;

#[cfg(feature = "max-filename-size-30")]
pub const MAX_FILENAME_SIZE: usize = 30;
/// Longest exFAT name, 255 UTF-16 code units, in UTF-8 bytes for most scripts
#[cfg(not(feature = "limit-filename-size"))]
pub const MAX_FILENAME_SIZE: usize = 510;

#[derive(Copy, Clone, Debug)]
pub struct TouchOptions {
    pub access: bool,
    pub modified: bool,
}

impl Default for TouchOptions {
    fn default() -> Self {
        Self { access: true, modified: true }
    }
}

#[derive(Copy, Clone, Default, Debug)]
pub struct FileOptions {
    /// Fragmentation makes write latency unpredictable,
    /// with this option set a write returns `OperationError::Fragment`
    /// instead of allocating a non-adjacent cluster
    pub dont_fragment: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    End(i64),
    Current(i64),
}

/// FAT size field is 32 bits wide
const FAT_MAX_FILE_SIZE: u64 = u32::MAX as u64;

pub struct File<D: BlockDevice> {
    partition: Shared<Partition<D>>,
    entry: DirEntry,
    options: FileOptions,
    position: u64,
    /// Index within chain and cluster of last access
    cursor: Option<(u32, ClusterID)>,
    dirty: bool,
    /// Modified timestamp refreshed on next flush
    stamp: bool,
    closed: bool,
}

impl<D: BlockDevice> File<D> {
    pub(crate) fn new(partition: Shared<Partition<D>>, entry: DirEntry) -> Self {
        let options = FileOptions::default();
        Self {
            partition,
            entry,
            options,
            position: 0,
            cursor: None,
            dirty: false,
            stamp: false,
            closed: false,
        }
    }

    pub fn change_options(&mut self, f: impl Fn(&mut FileOptions)) {
        f(&mut self.options)
    }

    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Cluster at `index` of the chain, appending clusters if `allocate`
    fn locate(
        &mut self,
        partition: &mut Partition<D>,
        index: u32,
        allocate: bool,
    ) -> Result<ClusterID, Error<D::Error>> {
        let geometry = *partition.geometry();
        if index >= geometry.cluster_count {
            return Err(DataError::ChainCycle.into());
        }
        let cluster_size = geometry.cluster_size() as u64;
        let dont_fragment = self.options.dont_fragment;
        if !self.entry.first_cluster.valid() {
            if !allocate {
                warn!("File {} has size but no cluster", self.entry.name());
                return Err(DataError::Metadata.into());
            }
            let cluster = partition.allocate_cluster(None, &mut self.entry.layout, dont_fragment)?;
            self.entry.first_cluster = cluster;
            self.entry.capacity += cluster_size;
            self.dirty = true;
            self.cursor = Some((0, cluster));
        }
        let (mut current, mut cluster) = match self.cursor {
            Some((current, cluster)) if current <= index => (current, cluster),
            _ => (0, self.entry.first_cluster),
        };
        while current < index {
            cluster = match partition.core_mut().chain_next(cluster, self.entry.layout)? {
                Some(next) => next,
                None if allocate => {
                    let layout = &mut self.entry.layout;
                    let next = partition.allocate_cluster(Some(cluster), layout, dont_fragment)?;
                    self.entry.capacity += cluster_size;
                    self.dirty = true;
                    next
                }
                None => {
                    warn!("Chain of {} shorter than its size", self.entry.name());
                    return Err(DataError::Metadata.into());
                }
            };
            current += 1;
        }
        self.cursor = Some((index, cluster));
        Ok(cluster)
    }

    /// Reads up to `buf.len()` bytes, 0 at end of file
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error<D::Error>> {
        if self.position >= self.entry.size || buf.is_empty() {
            return Ok(0);
        }
        let shared = self.partition.clone();
        let mut partition = acquire!(shared);
        let geometry = *partition.geometry();
        let cluster_shift = geometry.cluster_size_shift();
        let sector_shift = geometry.sector_size_shift;
        let sector_size = geometry.sector_size() as usize;
        let length = core::cmp::min(buf.len() as u64, self.entry.size - self.position) as usize;
        let mut done = 0;
        while done < length {
            let index = (self.position >> cluster_shift) as u32;
            let cluster = self.locate(&mut partition, index, false)?;
            let within = self.position & (geometry.cluster_size() as u64 - 1);
            let sector = geometry.cluster_sector(cluster) + (within >> sector_shift);
            let offset = (within as usize) & (sector_size - 1);
            let size = core::cmp::min(sector_size - offset, length - done);
            let core = partition.core_mut();
            let bytes = core.cache.fetch(&mut core.io, sector)?;
            buf[done..done + size].copy_from_slice(&bytes[offset..offset + size]);
            done += size;
            self.position += size as u64;
        }
        Ok(length)
    }

    /// Fills `buf` entirely or fails with `Error::EOF` without reading
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error<D::Error>> {
        if self.entry.size.saturating_sub(self.position) < buf.len() as u64 {
            return Err(Error::EOF);
        }
        self.read(buf)?;
        Ok(())
    }

    /// Writes all of `bytes` at current position, metadata written back on flush
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, Error<D::Error>> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let shared = self.partition.clone();
        let mut partition = acquire!(shared);
        let geometry = *partition.geometry();
        let end = self.position + bytes.len() as u64;
        if geometry.fat_type != FatType::ExFat && end > FAT_MAX_FILE_SIZE {
            return Err(InputError::Size.into());
        }
        let cluster_shift = geometry.cluster_size_shift();
        let sector_shift = geometry.sector_size_shift;
        let sector_size = geometry.sector_size() as usize;
        let mut done = 0;
        while done < bytes.len() {
            let index = (self.position >> cluster_shift) as u32;
            let cluster = self.locate(&mut partition, index, true)?;
            let within = self.position & (geometry.cluster_size() as u64 - 1);
            let sector = geometry.cluster_sector(cluster) + (within >> sector_shift);
            let offset = (within as usize) & (sector_size - 1);
            let size = core::cmp::min(sector_size - offset, bytes.len() - done);
            let whole = size == sector_size || self.position >= self.entry.size;
            let intent = match offset == 0 && whole {
                true => Intent::Overwrite,
                false => Intent::Update,
            };
            let core = partition.core_mut();
            let buf = core.cache.fetch_mut(&mut core.io, sector, intent)?;
            buf[offset..offset + size].copy_from_slice(&bytes[done..done + size]);
            done += size;
            self.position += size as u64;
            if self.position > self.entry.size {
                self.entry.size = self.position;
            }
            self.dirty = true;
            self.stamp = true;
        }
        Ok(done)
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error<D::Error>> {
        self.write(bytes)?;
        Ok(())
    }

    /// Target must lie within `0..=size`
    pub fn seek(&mut self, seek_from: SeekFrom) -> Result<u64, Error<D::Error>> {
        let target = match seek_from {
            SeekFrom::Start(position) => Some(position),
            SeekFrom::End(offset) => self.entry.size.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };
        let position = match target {
            Some(position) if position <= self.entry.size => position,
            _ => return Err(InputError::SeekPosition.into()),
        };
        self.position = position;
        Ok(position)
    }

    /// Shrinks file to `size`, clusters beyond freed
    pub fn truncate(&mut self, size: u64) -> Result<(), Error<D::Error>> {
        if size > self.entry.size {
            return Err(InputError::Size.into());
        }
        let shared = self.partition.clone();
        let mut partition = acquire!(shared);
        let keep = partition.geometry().clusters_for(size) as u32;
        partition.truncate_chain(&mut self.entry, keep)?;
        self.entry.size = size;
        self.position = core::cmp::min(self.position, size);
        self.cursor = None;
        self.dirty = true;
        self.stamp = true;
        Ok(())
    }

    /// Reserves a contiguous run for a file without clusters
    pub fn preallocate(&mut self, length: u64) -> Result<(), Error<D::Error>> {
        if self.entry.first_cluster.valid() {
            return Err(InputError::Size.into());
        }
        let shared = self.partition.clone();
        let mut partition = acquire!(shared);
        let geometry = *partition.geometry();
        if geometry.fat_type != FatType::ExFat && length > FAT_MAX_FILE_SIZE {
            return Err(InputError::Size.into());
        }
        let count = u32::try_from(geometry.clusters_for(length)).map_err(|_| InputError::Size)?;
        if count == 0 {
            return Ok(());
        }
        let first = partition.allocate_run(count, &mut self.entry.layout)?;
        self.entry.first_cluster = first;
        self.entry.capacity = (count as u64) << geometry.cluster_size_shift();
        self.cursor = None;
        self.dirty = true;
        Ok(())
    }

    /// Takes effect on flush
    pub fn touch(
        &mut self,
        datetime: DateTime,
        options: TouchOptions,
    ) -> Result<(), Error<D::Error>> {
        if options.access {
            self.entry.accessed = datetime;
        }
        if options.modified {
            self.entry.modified = datetime;
            self.stamp = false;
        }
        self.dirty = true;
        Ok(())
    }

    /// Writes entry back, then flushes FAT, data and device
    pub fn flush(&mut self) -> Result<(), Error<D::Error>> {
        let shared = self.partition.clone();
        let mut partition = acquire!(shared);
        if self.stamp {
            let now = DateTime::now();
            self.entry.modified = now;
            self.entry.accessed = now;
            self.stamp = false;
        }
        if self.dirty {
            partition.update(&self.entry)?;
            self.dirty = false;
        }
        partition.core_mut().flush()
    }

    fn unregister(&mut self) {
        acquire!(self.partition).core_mut().opened.remove(self.entry.id);
        self.closed = true;
    }

    pub fn close(mut self) -> Result<(), Error<D::Error>> {
        let result = self.flush();
        self.unregister();
        result
    }
}

impl<D: BlockDevice> Debug for File<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let entry = &self.entry;
        f.debug_struct("File")
            .field("name", &entry.name())
            .field("position", &self.position)
            .finish()
    }
}

impl<D: BlockDevice> Drop for File<D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.flush() {
            warn!("Flush {} on drop failed: {:?}", self.entry.name(), error);
        }
        self.unregister();
    }
}
