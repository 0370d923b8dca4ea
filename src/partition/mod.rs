//! FAT12/16/32 and exFAT behind a single partition type
//!
//! [`Core`] holds everything both variants share: the device, the sector
//! cache, the FAT cache, the geometry and the allocator state. The variants
//! only differ in how free space is tracked, how a chain is extended and how
//! directory entries are encoded.

pub(crate) mod bitmap;
pub(crate) mod exfat;
pub(crate) mod fat;

use alloc::vec::Vec;
use core::fmt::Debug;

use crate::allocator::Allocator;
use crate::cache::fat::FatCache;
use crate::cache::{Intent, SectorCache};
use crate::error::{DataError, Error, OperationError};
use crate::file::MAX_FILENAME_SIZE;
use crate::geometry::{FatType, Geometry, RootLocation};
use crate::io::BlockDevice;
use crate::region::data::entryset::primary::{DateTime, FileAttributes};
use crate::region::data::entryset::{RawEntry, ENTRY_SIZE};
use crate::region::fat::Entry;
use crate::region::{write, Plain};
use crate::types::{ClusterID, SectorID};
use crate::volume::MountOptions;
pub(crate) use exfat::ExFatPartition;
pub(crate) use fat::FatPartition;

/// Longest entry set, 20 long name entries plus the short entry on FAT
pub(crate) const MAX_ENTRIES: usize = 21;

/// How the clusters of a file or directory are linked
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Successors recorded in the FAT
    Chained,
    /// exFAT only, `count` clusters from `first` with FAT entries ignored,
    /// `count` 0 for an empty file
    Contiguous { first: ClusterID, count: u32 },
}

impl Layout {
    pub(crate) const EMPTY: Self = Self::Contiguous { first: ClusterID::ZERO, count: 0 };
}

/// Directory entry slot on disk
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryLocation {
    pub sector: SectorID,
    pub index: u16,
}

/// Metadata of a file or directory as recorded in its parent directory
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub(crate) name: heapless::String<MAX_FILENAME_SIZE>,
    pub(crate) attributes: FileAttributes,
    pub(crate) first_cluster: ClusterID,
    pub(crate) size: u64,
    pub(crate) capacity: u64,
    pub(crate) layout: Layout,
    pub(crate) created: DateTime,
    pub(crate) modified: DateTime,
    pub(crate) accessed: DateTime,
    /// Every slot of the entry set, empty for root directory
    pub(crate) locations: heapless::Vec<EntryLocation, MAX_ENTRIES>,
    /// Slot identifying this entry, short entry on FAT and file entry on exFAT
    pub(crate) id: EntryLocation,
}

impl DirEntry {
    pub(crate) fn root(first_cluster: ClusterID) -> Self {
        Self {
            name: heapless::String::new(),
            attributes: FileAttributes::new(true),
            first_cluster,
            size: 0,
            capacity: 0,
            layout: Layout::Chained,
            created: DateTime::default(),
            modified: DateTime::default(),
            accessed: DateTime::default(),
            locations: heapless::Vec::new(),
            id: EntryLocation::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.directory()
    }

    pub fn is_root(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn first_cluster(&self) -> ClusterID {
        self.first_cluster
    }

    /// Valid data length in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Allocated length in bytes, exact on exFAT,
    /// derived from size on FAT unless allocated in this session
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_contiguous(&self) -> bool {
        matches!(self.layout, Layout::Contiguous { count, .. } if count > 0)
    }

    pub fn created(&self) -> DateTime {
        self.created
    }

    pub fn modified(&self) -> DateTime {
        self.modified
    }

    pub fn accessed(&self) -> DateTime {
        self.accessed
    }

    pub fn location(&self) -> Option<EntryLocation> {
        match self.is_root() {
            true => None,
            false => Some(self.id),
        }
    }
}

/// Entries currently held by a file or directory handle
#[derive(Debug, Default)]
pub(crate) struct OpenedEntries(Vec<EntryLocation>);

impl OpenedEntries {
    pub fn add(&mut self, id: EntryLocation) -> bool {
        let index = match self.0.binary_search(&id) {
            Ok(_) => return false,
            Err(index) => index,
        };
        self.0.insert(index, id);
        true
    }

    pub fn remove(&mut self, id: EntryLocation) -> bool {
        let index = match self.0.binary_search(&id) {
            Ok(index) => index,
            Err(_) => return false,
        };
        self.0.remove(index);
        true
    }

    pub fn contains(&self, id: EntryLocation) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Storage of a directory
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Region {
    /// FAT12/16 root directory
    Fixed { sector: SectorID, sectors: u32 },
    Chain { first: ClusterID, layout: Layout },
}

pub(crate) struct Core<D> {
    pub io: D,
    pub cache: SectorCache,
    pub fat: FatCache,
    pub geometry: Geometry,
    pub allocator: Allocator,
    pub opened: OpenedEntries,
}

impl<D: BlockDevice> Core<D> {
    pub fn new(io: D, geometry: Geometry, options: &MountOptions, copies: u8) -> Self {
        let sector_size = geometry.sector_size() as usize;
        Self {
            io,
            cache: SectorCache::new(options.cache_depth, sector_size),
            fat: FatCache::new(&geometry, options.fat_cache_depth, copies),
            allocator: Allocator::new(geometry.cluster_count, None),
            geometry,
            opened: OpenedEntries::default(),
        }
    }

    /// Successor of `cluster`, None at end of chain
    pub fn chain_next(
        &mut self,
        cluster: ClusterID,
        layout: Layout,
    ) -> Result<Option<ClusterID>, Error<D::Error>> {
        if !self.geometry.contains(cluster) {
            warn!("Cluster {} out of range", cluster);
            return Err(DataError::ClusterRange(cluster).into());
        }
        if let Layout::Contiguous { first, count } = layout {
            if cluster < first || cluster - first >= count {
                warn!("Cluster {} outside contiguous run {}+{}", cluster, first, count);
                return Err(DataError::ClusterRange(cluster).into());
            }
            return match cluster - first + 1 < count {
                true => Ok(Some(cluster + 1u32)),
                false => Ok(None),
            };
        }
        match self.fat.get(&mut self.io, cluster)? {
            Entry::Next(next) if self.geometry.contains(next) => Ok(Some(next)),
            Entry::Next(next) => {
                warn!("Cluster {} links to out of range cluster {}", cluster, next);
                Err(DataError::ClusterRange(next).into())
            }
            Entry::Last => Ok(None),
            entry => {
                warn!("Unexpected FAT entry {:?} on cluster {}", entry, cluster);
                Err(DataError::FatEntry(cluster).into())
            }
        }
    }

    /// Cluster at `index` of a chain, None if chain is shorter
    pub fn nth_cluster(
        &mut self,
        first: ClusterID,
        layout: Layout,
        index: u32,
    ) -> Result<Option<ClusterID>, Error<D::Error>> {
        if index >= self.geometry.cluster_count {
            return Err(DataError::ChainCycle.into());
        }
        let mut cluster = first;
        for _ in 0..index {
            cluster = match self.chain_next(cluster, layout)? {
                Some(next) => next,
                None => return Ok(None),
            };
        }
        Ok(Some(cluster))
    }

    pub fn region(&self, directory: &DirEntry) -> Region {
        match (directory.is_root(), self.geometry.root) {
            (true, RootLocation::Region { sector, entries }) => {
                let bytes = entries as u32 * ENTRY_SIZE as u32;
                let sector_size = self.geometry.sector_size();
                Region::Fixed { sector, sectors: (bytes + sector_size - 1) / sector_size }
            }
            _ => Region::Chain { first: directory.first_cluster, layout: directory.layout },
        }
    }

    pub fn read_entry(&mut self, location: EntryLocation) -> Result<RawEntry, Error<D::Error>> {
        let offset = location.index as usize * ENTRY_SIZE;
        let sector = self.cache.fetch(&mut self.io, location.sector)?;
        let mut entry = [0u8; ENTRY_SIZE];
        entry.copy_from_slice(&sector[offset..offset + ENTRY_SIZE]);
        Ok(entry)
    }

    pub fn write_entry(
        &mut self,
        location: EntryLocation,
        entry: &RawEntry,
    ) -> Result<(), Error<D::Error>> {
        let offset = location.index as usize * ENTRY_SIZE;
        let sector = self.cache.fetch_mut(&mut self.io, location.sector, Intent::Update)?;
        sector[offset..offset + ENTRY_SIZE].copy_from_slice(entry);
        Ok(())
    }

    pub fn zero_cluster(&mut self, cluster: ClusterID) -> Result<(), Error<D::Error>> {
        let sector = self.geometry.cluster_sector(cluster);
        for i in 0..self.geometry.sectors_per_cluster() {
            self.cache.fetch_mut(&mut self.io, sector + i, Intent::Overwrite)?;
        }
        Ok(())
    }

    /// FAT first, directory entries and data next, then the device itself
    pub fn flush(&mut self) -> Result<(), Error<D::Error>> {
        self.fat.flush_all(&mut self.io)?;
        self.cache.flush_all(&mut self.io)?;
        self.io.sync().map_err(Error::IO)
    }

    pub fn invalidate(&mut self) {
        self.fat.invalidate_all();
        self.cache.invalidate_all();
        self.allocator.invalidate();
    }
}

/// Walks a directory slot by slot, following the cluster chain
#[derive(Clone, Debug)]
pub(crate) struct EntryCursor {
    region: Region,
    cluster: ClusterID,
    sector: u32,
    index: u16,
    steps: u32,
    end: bool,
}

impl EntryCursor {
    pub fn new(region: Region) -> Self {
        let (cluster, end) = match region {
            Region::Fixed { sectors, .. } => (ClusterID::ZERO, sectors == 0),
            Region::Chain { first, .. } => (first, !first.valid()),
        };
        Self { region, cluster, sector: 0, index: 0, steps: 0, end }
    }

    pub fn is_end(&self) -> bool {
        self.end
    }

    /// Current cluster, the last one of the chain once at end
    pub fn cluster(&self) -> ClusterID {
        self.cluster
    }

    pub fn location(&self, geometry: &Geometry) -> EntryLocation {
        let sector = match self.region {
            Region::Fixed { sector, .. } => sector + self.sector,
            Region::Chain { .. } => geometry.cluster_sector(self.cluster) + self.sector,
        };
        EntryLocation { sector, index: self.index }
    }

    pub fn advance<D: BlockDevice>(&mut self, core: &mut Core<D>) -> Result<(), Error<D::Error>> {
        if self.end {
            return Ok(());
        }
        let per_sector = (core.geometry.sector_size() as usize / ENTRY_SIZE) as u16;
        self.index += 1;
        if self.index < per_sector {
            return Ok(());
        }
        self.index = 0;
        self.sector += 1;
        match self.region {
            Region::Fixed { sectors, .. } => self.end = self.sector >= sectors,
            Region::Chain { layout, .. } => {
                if self.sector < core.geometry.sectors_per_cluster() {
                    return Ok(());
                }
                match core.chain_next(self.cluster, layout)? {
                    Some(next) => {
                        self.steps += 1;
                        if self.steps >= core.geometry.cluster_count {
                            return Err(DataError::ChainCycle.into());
                        }
                        self.cluster = next;
                        self.sector = 0;
                    }
                    None => self.end = true,
                }
            }
        }
        Ok(())
    }

    /// Continue on a cluster just appended to the chain
    pub fn resume(&mut self, cluster: ClusterID, layout: Layout) {
        if let Region::Chain { first, .. } = self.region {
            self.region = Region::Chain { first, layout };
        }
        self.cluster = cluster;
        self.sector = 0;
        self.index = 0;
        self.end = false;
    }
}

/// Entry set about to be written into free slots
pub(crate) struct NewEntry<'a> {
    pub name: &'a str,
    pub is_directory: bool,
    pub first_cluster: ClusterID,
    pub layout: Layout,
    pub locations: heapless::Vec<EntryLocation, MAX_ENTRIES>,
    pub now: DateTime,
}

/// Copy an on-disk structure into a directory slot
pub(crate) fn raw_entry<T: Plain>(value: &T) -> RawEntry {
    let mut entry = [0u8; ENTRY_SIZE];
    write(&mut entry, value);
    entry
}

pub(crate) enum Partition<D> {
    Fat(FatPartition<D>),
    ExFat(ExFatPartition<D>),
}

macro_rules! dispatch {
    ($self:ident, $partition:ident => $expr:expr) => {
        match $self {
            Partition::Fat($partition) => $expr,
            Partition::ExFat($partition) => $expr,
        }
    };
}

impl<D: BlockDevice> Partition<D> {
    pub fn core(&self) -> &Core<D> {
        dispatch!(self, partition => &partition.core)
    }

    pub fn core_mut(&mut self) -> &mut Core<D> {
        dispatch!(self, partition => &mut partition.core)
    }

    pub fn into_io(self) -> D {
        dispatch!(self, partition => partition.core.io)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.core().geometry
    }

    pub fn fat_type(&self) -> FatType {
        self.core().geometry.fat_type
    }

    pub fn label(&self) -> &str {
        dispatch!(self, partition => partition.label())
    }

    pub fn root(&self) -> DirEntry {
        match self.core().geometry.root {
            RootLocation::Cluster(cluster) => DirEntry::root(cluster),
            RootLocation::Region { .. } => DirEntry::root(ClusterID::ZERO),
        }
    }

    /// Appends a cluster to the chain ending at `prev`, or starts a new chain
    pub fn allocate_cluster(
        &mut self,
        prev: Option<ClusterID>,
        layout: &mut Layout,
        dont_fragment: bool,
    ) -> Result<ClusterID, Error<D::Error>> {
        if let Some(prev) = prev.filter(|&prev| !self.geometry().contains(prev)) {
            return Err(DataError::ClusterRange(prev).into());
        }
        dispatch!(self, partition => partition.allocate_cluster(prev, layout, dont_fragment))
    }

    /// Starts a new chain of `count` contiguous clusters
    pub fn allocate_run(
        &mut self,
        count: u32,
        layout: &mut Layout,
    ) -> Result<ClusterID, Error<D::Error>> {
        dispatch!(self, partition => partition.allocate_run(count, layout))
    }

    /// Frees from `start` to end of chain, stopping at the first cluster already free
    pub fn free_chain(&mut self, start: ClusterID, layout: Layout) -> Result<u32, Error<D::Error>> {
        let freed = dispatch!(self, partition => partition.free_chain(start, layout))?;
        debug!("{} clusters freed from cluster {}", freed, start);
        Ok(freed)
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, Error<D::Error>> {
        dispatch!(self, partition => partition.free_cluster_count())
    }

    /// Keeps the first `keep` clusters of an entry, frees the rest
    pub fn truncate_chain(
        &mut self,
        entry: &mut DirEntry,
        keep: u32,
    ) -> Result<(), Error<D::Error>> {
        let (first, layout) = (entry.first_cluster, entry.layout);
        if !first.valid() {
            return Ok(());
        }
        let cluster_size = self.geometry().cluster_size() as u64;
        if keep == 0 {
            self.free_chain(first, layout)?;
            entry.first_cluster = ClusterID::ZERO;
            entry.layout = self.empty_layout();
            entry.capacity = 0;
            return Ok(());
        }
        let last = match self.core_mut().nth_cluster(first, layout, keep - 1)? {
            Some(cluster) => cluster,
            None => return Ok(()),
        };
        let next = match self.core_mut().chain_next(last, layout)? {
            Some(next) => next,
            None => return Ok(()),
        };
        match &mut entry.layout {
            Layout::Contiguous { count, .. } => *count = keep,
            Layout::Chained => {
                let core = self.core_mut();
                core.fat.set(&mut core.io, last, Entry::Last)?
            }
        }
        self.free_chain(next, layout)?;
        entry.capacity = keep as u64 * cluster_size;
        Ok(())
    }

    /// Layout of an entry without clusters
    pub fn empty_layout(&self) -> Layout {
        match self {
            Self::Fat(_) => Layout::Chained,
            Self::ExFat(_) => Layout::EMPTY,
        }
    }

    fn slot_is_free(&self, entry: &RawEntry) -> bool {
        match self {
            Self::Fat(_) => fat::slot_is_free(entry),
            Self::ExFat(_) => exfat::slot_is_free(entry),
        }
    }

    /// Walks through a directory until `f` returns true
    pub fn walk<F: FnMut(&DirEntry) -> bool>(
        &mut self,
        directory: &DirEntry,
        f: F,
    ) -> Result<Option<DirEntry>, Error<D::Error>> {
        dispatch!(self, partition => partition.walk(directory, f))
    }

    pub fn find(
        &mut self,
        directory: &DirEntry,
        name: &str,
    ) -> Result<Option<DirEntry>, Error<D::Error>> {
        dispatch!(self, partition => partition.find(directory, name))
    }

    /// Finds `count` consecutive free slots, growing the directory by one zeroed cluster if needed
    pub(crate) fn find_slots(
        &mut self,
        directory: &mut DirEntry,
        count: usize,
    ) -> Result<heapless::Vec<EntryLocation, MAX_ENTRIES>, Error<D::Error>> {
        let region = self.core().region(directory);
        let mut cursor = EntryCursor::new(region);
        let mut run: heapless::Vec<EntryLocation, MAX_ENTRIES> = heapless::Vec::new();
        loop {
            while !cursor.is_end() {
                let location = cursor.location(self.geometry());
                let entry = self.core_mut().read_entry(location)?;
                match self.slot_is_free(&entry) {
                    true => {
                        run.push(location).ok();
                        if run.len() == count {
                            return Ok(run);
                        }
                    }
                    false => run.clear(),
                }
                cursor.advance(self.core_mut())?;
            }
            if let Region::Fixed { .. } = region {
                return Err(OperationError::DirectoryFull.into());
            }
            let cluster = self.grow(directory, cursor.cluster())?;
            cursor.resume(cluster, directory.layout);
        }
    }

    fn grow(
        &mut self,
        directory: &mut DirEntry,
        last: ClusterID,
    ) -> Result<ClusterID, Error<D::Error>> {
        let prev = Some(last).filter(|cluster| cluster.valid());
        let cluster = self.allocate_cluster(prev, &mut directory.layout, false)?;
        if prev.is_none() {
            directory.first_cluster = cluster;
        }
        self.core_mut().zero_cluster(cluster)?;
        if let Self::ExFat(_) = self {
            let cluster_size = self.geometry().cluster_size() as u64;
            directory.capacity += cluster_size;
            directory.size = directory.capacity;
        }
        debug!("Directory {} grown by cluster {}", directory.name(), cluster);
        if !directory.is_root() {
            self.update(directory)?;
        }
        Ok(cluster)
    }

    /// New entry in `directory`, a zeroed cluster attached if creating a directory
    pub fn create(
        &mut self,
        directory: &mut DirEntry,
        name: &str,
        is_directory: bool,
    ) -> Result<DirEntry, Error<D::Error>> {
        let count = dispatch!(self, partition => partition.prepare(directory, name))?;
        let locations = self.find_slots(directory, count)?;
        let mut layout = self.empty_layout();
        let mut first_cluster = ClusterID::ZERO;
        if is_directory {
            first_cluster = self.allocate_cluster(None, &mut layout, false)?;
            self.core_mut().zero_cluster(first_cluster)?;
        }
        let now = DateTime::now();
        let new = NewEntry { name, is_directory, first_cluster, layout, locations, now };
        let entry = dispatch!(self, partition => partition.write_entries(directory, new))?;
        debug!("Created {} {}", if is_directory { "directory" } else { "file" }, entry.name());
        Ok(entry)
    }

    /// Writes size, first cluster, layout and timestamps back to the entry set
    pub fn update(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        if entry.is_root() {
            return Ok(());
        }
        dispatch!(self, partition => partition.update(entry))
    }

    /// Deletes an entry and frees its clusters
    pub fn remove(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        if entry.is_root() {
            return Err(OperationError::NotFile.into());
        }
        if self.core().opened.contains(entry.id) {
            return Err(OperationError::AlreadyOpen.into());
        }
        if entry.is_directory() && self.walk(entry, |_| true)?.is_some() {
            return Err(OperationError::DirectoryNotEmpty.into());
        }
        dispatch!(self, partition => partition.mark_deleted(entry))?;
        if entry.first_cluster.valid() {
            self.free_chain(entry.first_cluster, entry.layout)?;
        }
        debug!("Removed {}", entry.name());
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), Error<D::Error>> {
        dispatch!(self, partition => partition.sync())
    }

    pub fn invalidate(&mut self) {
        self.core_mut().invalidate()
    }
}

impl<D> Debug for Partition<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (kind, geometry) = match self {
            Self::Fat(partition) => ("FAT", &partition.core.geometry),
            Self::ExFat(partition) => ("exFAT", &partition.core.geometry),
        };
        f.debug_struct(kind).field("geometry", geometry).finish()
    }
}
