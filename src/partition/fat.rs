use alloc::vec;

use super::{raw_entry, Core, DirEntry, EntryCursor, EntryLocation, Layout, NewEntry, MAX_ENTRIES};
use crate::allocator::{Allocator, ClusterMap};
use crate::cache::fat::FatCache;
use crate::cache::Intent;
use crate::error::{DataError, Error, FormatError, InputError, OperationError};
use crate::geometry::{FatType, Geometry, RootLocation};
use crate::io::BlockDevice;
use crate::region::boot::{
    has_signature, BiosParameterBlock, Fat16Extension, Fat32Extension, FsInfo,
};
use crate::region::data::entryset::primary::{DateTime, FileAttributes, Timestamp};
use crate::region::data::entryset::RawEntry;
use crate::region::data::short::{ShortEntry, ShortName, ATTR_ARCHIVE, ATTR_DIRECTORY};
use crate::region::data::short::{DELETED, END_OF_DIRECTORY};
use crate::region::fat::Entry;
use crate::region::{read, write};
use crate::types::{ClusterID, SectorID};
use crate::volume::MountOptions;

const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
const MAX_FAT32_CLUSTERS: u32 = 0x0FFFFFF5;
/// Offset of the checksum byte in a long name entry
const LONG_NAME_CHECKSUM: usize = 13;

pub(crate) fn slot_is_free(entry: &RawEntry) -> bool {
    entry[0] == END_OF_DIRECTORY || entry[0] == DELETED
}

/// FAT entries as the free space map
pub(crate) struct FatMap<'a, D> {
    pub io: &'a mut D,
    pub fat: &'a mut FatCache,
    pub cluster_count: u32,
}

impl<'a, D: BlockDevice> ClusterMap for FatMap<'a, D> {
    type Error = D::Error;

    fn is_free(&mut self, cluster: ClusterID) -> Result<bool, Error<D::Error>> {
        Ok(self.fat.get(self.io, cluster)? == Entry::Free)
    }

    fn count_free(&mut self) -> Result<u32, Error<D::Error>> {
        self.fat.count_free(self.io, self.cluster_count)
    }
}

/// Validated boot sector content
struct Boot {
    geometry: Geometry,
    copies: u8,
    fs_info: Option<SectorID>,
    media: u8,
    label: heapless::String<11>,
}

fn label_from(bytes: &[u8]) -> heapless::String<11> {
    let mut label = heapless::String::new();
    let length = bytes.iter().rposition(|&b| b != b' ' && b != 0).map(|i| i + 1).unwrap_or(0);
    if &bytes[..length] == b"NO NAME" {
        return label;
    }
    for &byte in &bytes[..length] {
        label.push(byte as char).ok();
    }
    label
}

fn probe<D: BlockDevice>(io: &mut D, offset: SectorID) -> Result<Boot, Error<D::Error>> {
    let sector_size_shift = io.sector_size_shift();
    let mut sector = vec![0u8; 1 << sector_size_shift];
    io.read(offset, &mut sector).map_err(Error::IO)?;
    let bpb: BiosParameterBlock = read(&sector);
    if !has_signature(&sector) || !bpb.is_fat() {
        return Err(FormatError::Signature.into());
    }
    let bytes_per_sector = bpb.bytes_per_sector.to_ne() as u32;
    if bytes_per_sector != 1 << sector_size_shift {
        return Err(FormatError::SectorSize(bytes_per_sector).into());
    }
    let reserved = bpb.reserved_sector_count.to_ne() as u64;
    let fat_count = bpb.number_of_fats;
    if reserved == 0 || !(1..=2).contains(&fat_count) {
        return Err(FormatError::Geometry.into());
    }
    let ext32: Fat32Extension = read(&sector[BiosParameterBlock::EXTENSION_OFFSET..]);
    let fat_size_16 = bpb.fat_size_16.to_ne() as u32;
    let fat_length = match fat_size_16 {
        0 => ext32.fat_size_32.to_ne(),
        size => size,
    };
    let total = bpb.total_sectors() as u64;
    if fat_length == 0 || total == 0 || offset + total > SectorID::from(io.num_sectors()) {
        return Err(FormatError::Geometry.into());
    }
    let root_entries = bpb.root_entry_count.to_ne();
    let root_sectors =
        (root_entries as u64 * 32 + bytes_per_sector as u64 - 1) / bytes_per_sector as u64;
    let root_region = reserved + fat_count as u64 * fat_length as u64;
    let data_start = root_region + root_sectors;
    if data_start >= total {
        return Err(FormatError::Geometry.into());
    }
    let sectors_per_cluster_shift = bpb.sectors_per_cluster.trailing_zeros() as u8;
    let cluster_count = u32::try_from((total - data_start) >> sectors_per_cluster_shift)
        .map_err(|_| FormatError::Geometry)?;
    // A zero 16-bit FAT size only exists in the FAT32 BPB, small FAT32 volumes included
    let fat_type = match fat_size_16 {
        0 => FatType::Fat32,
        _ => FatType::from_cluster_count(cluster_count).ok_or(FormatError::Geometry)?,
    };
    let too_many = fat_type == FatType::Fat32 && cluster_count > MAX_FAT32_CLUSTERS;
    if cluster_count == 0 || too_many {
        return Err(FormatError::Geometry.into());
    }
    let capacity = (fat_length as u64 * bytes_per_sector as u64 * 8) / fat_type.entry_bits() as u64;
    if capacity < cluster_count as u64 + 2 {
        return Err(FormatError::Geometry.into());
    }

    let mut fat_offset = offset + reserved;
    let mut copies = fat_count;
    let (root, fs_info, serial_number, label) = match fat_type {
        FatType::Fat32 => {
            let flags = ext32.ext_flags();
            if flags.mirroring_disabled() {
                let active = flags.active_fat() as u8;
                if active >= fat_count {
                    return Err(FormatError::Geometry.into());
                }
                fat_offset += active as u64 * fat_length as u64;
                copies = 1;
            }
            let root = ClusterID::from(ext32.root_cluster.to_ne());
            if !root.valid() || root > ClusterID::FIRST + (cluster_count - 1) || root_entries != 0 {
                return Err(FormatError::Geometry.into());
            }
            let fs_info = ext32.fs_info.to_ne() as u64;
            let fs_info = match fs_info > 0 && fs_info < reserved {
                true => Some(offset + fs_info),
                false => None,
            };
            let (serial, label) = match ext32.boot_signature {
                EXTENDED_BOOT_SIGNATURE => {
                    (ext32.volume_id.to_ne(), label_from(&ext32.volume_label))
                }
                _ => (0, heapless::String::new()),
            };
            (RootLocation::Cluster(root), fs_info, serial, label)
        }
        _ => {
            if root_entries == 0 {
                return Err(FormatError::Geometry.into());
            }
            let ext16: Fat16Extension = read(&sector[BiosParameterBlock::EXTENSION_OFFSET..]);
            let (serial, label) = match ext16.boot_signature {
                EXTENDED_BOOT_SIGNATURE => {
                    (ext16.volume_id.to_ne(), label_from(&ext16.volume_label))
                }
                _ => (0, heapless::String::new()),
            };
            let root = RootLocation::Region { sector: offset + root_region, entries: root_entries };
            (root, None, serial, label)
        }
    };
    let geometry = Geometry {
        fat_type,
        sector_size_shift,
        sectors_per_cluster_shift,
        volume_offset: offset,
        volume_length: total,
        fat_offset,
        fat_length,
        fat_count,
        heap_offset: offset + data_start,
        cluster_count,
        root,
        serial_number,
    };
    Ok(Boot { geometry, copies, fs_info, media: bpb.media, label })
}

fn stamp(entry: &mut ShortEntry, now: DateTime) {
    let (date, time) = (now.timestamp.fat_date(), now.timestamp.fat_time());
    entry.create_tenth = (now.millisecond / 10) as u8;
    entry.create_date = date.into();
    entry.create_time = time.into();
    entry.write_date = date.into();
    entry.write_time = time.into();
    entry.access_date = date.into();
}

/// FAT12, FAT16 or FAT32 volume
pub(crate) struct FatPartition<D> {
    pub(crate) core: Core<D>,
    fs_info: Option<SectorID>,
    media: u8,
    label: heapless::String<11>,
}

impl<D: BlockDevice> FatPartition<D> {
    /// Device handed back on failure
    pub fn mount(
        mut io: D,
        offset: SectorID,
        options: &MountOptions,
    ) -> Result<Self, (Error<D::Error>, D)> {
        let boot = match probe(&mut io, offset) {
            Ok(boot) => boot,
            Err(error) => return Err((error, io)),
        };
        debug!("{} geometry {:?}", boot.geometry.fat_type, boot.geometry);
        let core = Core::new(io, boot.geometry, options, boot.copies);
        let mut partition =
            Self { core, fs_info: boot.fs_info, media: boot.media, label: boot.label };
        match partition.load() {
            Ok(()) => Ok(partition),
            Err(error) => Err((error, partition.core.io)),
        }
    }

    fn load(&mut self) -> Result<(), Error<D::Error>> {
        if let Some(sector) = self.fs_info {
            let core = &mut self.core;
            let info: FsInfo = read(core.cache.fetch(&mut core.io, sector)?);
            if info.is_valid() {
                let next_free = ClusterID::from(info.next_free.to_ne());
                core.allocator = Allocator::new(core.geometry.cluster_count, Some(next_free));
            } else {
                warn!("FSInfo signature mismatch, ignored");
                self.fs_info = None;
            }
        }
        if let Some(label) = self.root_label()? {
            self.label = label;
        }
        #[cfg(feature = "precise-allocation-counter")]
        self.free_cluster_count()?;
        Ok(())
    }

    /// Volume label entry of root directory, takes precedence over the boot sector one
    fn root_label(&mut self) -> Result<Option<heapless::String<11>>, Error<D::Error>> {
        let root = match self.core.geometry.root {
            RootLocation::Cluster(cluster) => DirEntry::root(cluster),
            RootLocation::Region { .. } => DirEntry::root(ClusterID::ZERO),
        };
        let mut cursor = EntryCursor::new(self.core.region(&root));
        while !cursor.is_end() {
            let raw = self.core.read_entry(cursor.location(&self.core.geometry))?;
            match raw[0] {
                END_OF_DIRECTORY => break,
                DELETED => {}
                _ => {
                    let entry: ShortEntry = read(&raw);
                    if entry.is_volume_label() {
                        return Ok(Some(label_from(&entry.name)));
                    }
                }
            }
            cursor.advance(&mut self.core)?;
        }
        Ok(None)
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub fn allocate_cluster(
        &mut self,
        prev: Option<ClusterID>,
        _layout: &mut Layout,
        dont_fragment: bool,
    ) -> Result<ClusterID, Error<D::Error>> {
        let core = &mut self.core;
        let cluster_count = core.geometry.cluster_count;
        let mut map = FatMap { io: &mut core.io, fat: &mut core.fat, cluster_count };
        let cluster = core.allocator.find(&mut map, prev)?;
        if let Some(prev) = prev {
            if dont_fragment && cluster != prev + 1u32 {
                return Err(OperationError::Fragment.into());
            }
        }
        core.fat.set(&mut core.io, cluster, Entry::Last)?;
        if let Some(prev) = prev {
            core.fat.set(&mut core.io, prev, Entry::Next(cluster))?;
        }
        core.allocator.commit(cluster);
        Ok(cluster)
    }

    pub fn allocate_run(
        &mut self,
        count: u32,
        layout: &mut Layout,
    ) -> Result<ClusterID, Error<D::Error>> {
        let core = &mut self.core;
        let cluster_count = core.geometry.cluster_count;
        let mut map = FatMap { io: &mut core.io, fat: &mut core.fat, cluster_count };
        let first = core.allocator.find_run(&mut map, count)?;
        for i in 0..count {
            let cluster = first + i;
            let entry = match i + 1 == count {
                true => Entry::Last,
                false => Entry::Next(cluster + 1u32),
            };
            core.fat.set(&mut core.io, cluster, entry)?;
            core.allocator.commit(cluster);
        }
        *layout = Layout::Chained;
        Ok(first)
    }

    pub fn free_chain(
        &mut self,
        start: ClusterID,
        _layout: Layout,
    ) -> Result<u32, Error<D::Error>> {
        let core = &mut self.core;
        let mut cluster = start;
        let mut freed = 0;
        for _ in 0..core.geometry.cluster_count {
            if !core.geometry.contains(cluster) {
                warn!("Cluster {} out of range", cluster);
                return Err(DataError::ClusterRange(cluster).into());
            }
            let next = match core.fat.get(&mut core.io, cluster)? {
                Entry::Free => return Ok(freed),
                Entry::Next(next) => Some(next),
                Entry::Last => None,
                entry => {
                    warn!("Unexpected FAT entry {:?} on cluster {}", entry, cluster);
                    return Err(DataError::FatEntry(cluster).into());
                }
            };
            core.fat.set(&mut core.io, cluster, Entry::Free)?;
            core.allocator.release(cluster);
            freed += 1;
            match next {
                Some(next) => cluster = next,
                None => return Ok(freed),
            }
        }
        warn!("Chain from cluster {} longer than cluster count", start);
        Err(DataError::ChainCycle.into())
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, Error<D::Error>> {
        let core = &mut self.core;
        let cluster_count = core.geometry.cluster_count;
        let mut map = FatMap { io: &mut core.io, fat: &mut core.fat, cluster_count };
        core.allocator.free_count(&mut map)
    }

    fn to_entry(
        &self,
        short: &ShortEntry,
        locations: heapless::Vec<EntryLocation, MAX_ENTRIES>,
        id: EntryLocation,
    ) -> DirEntry {
        let geometry = &self.core.geometry;
        let size = short.size.to_ne() as u64;
        let created = DateTime {
            timestamp: Timestamp::from_fat(short.create_date.to_ne(), short.create_time.to_ne()),
            millisecond: short.create_tenth as u16 * 10,
            ..Default::default()
        };
        let modified = Timestamp::from_fat(short.write_date.to_ne(), short.write_time.to_ne());
        let accessed = Timestamp::from_fat(short.access_date.to_ne(), 0);
        DirEntry {
            name: short.short_name().to_string(),
            attributes: FileAttributes::from(short.attributes),
            first_cluster: short.first_cluster(),
            size,
            capacity: geometry.clusters_for(size) << geometry.cluster_size_shift(),
            layout: Layout::Chained,
            created,
            modified: DateTime { timestamp: modified, ..Default::default() },
            accessed: DateTime { timestamp: accessed, ..Default::default() },
            locations,
            id,
        }
    }

    /// Long name entries are collected only to be deleted along with their short entry
    fn walk_short<F>(
        &mut self,
        directory: &DirEntry,
        mut f: F,
    ) -> Result<Option<DirEntry>, Error<D::Error>>
    where
        F: FnMut(&ShortEntry, &DirEntry) -> bool,
    {
        let mut cursor = EntryCursor::new(self.core.region(directory));
        let mut long_names: heapless::Vec<EntryLocation, MAX_ENTRIES> = heapless::Vec::new();
        let mut long_checksum = None;
        while !cursor.is_end() {
            let location = cursor.location(&self.core.geometry);
            let raw = self.core.read_entry(location)?;
            cursor.advance(&mut self.core)?;
            match raw[0] {
                END_OF_DIRECTORY => break,
                DELETED => {
                    long_names.clear();
                    continue;
                }
                _ => {}
            }
            let short: ShortEntry = read(&raw);
            if short.is_long_name() {
                let checksum = raw[LONG_NAME_CHECKSUM];
                if long_checksum != Some(checksum) || long_names.len() + 1 >= MAX_ENTRIES {
                    long_names.clear();
                }
                long_checksum = Some(checksum);
                long_names.push(location).ok();
                continue;
            }
            let mut locations = core::mem::take(&mut long_names);
            if long_checksum.take() != Some(short.short_name().checksum()) {
                locations.clear();
            }
            if short.is_volume_label() || short.is_dot() {
                continue;
            }
            locations.push(location).ok();
            let entry = self.to_entry(&short, locations, location);
            if f(&short, &entry) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn walk<F: FnMut(&DirEntry) -> bool>(
        &mut self,
        directory: &DirEntry,
        mut f: F,
    ) -> Result<Option<DirEntry>, Error<D::Error>> {
        self.walk_short(directory, |_, entry| f(entry))
    }

    pub fn find(
        &mut self,
        directory: &DirEntry,
        name: &str,
    ) -> Result<Option<DirEntry>, Error<D::Error>> {
        let name = ShortName::parse(name)?;
        self.walk_short(directory, |short, _| short.short_name().matches(&name))
    }

    /// Number of slots needed by `name`, which must not exist yet
    pub fn prepare(&mut self, directory: &DirEntry, name: &str) -> Result<usize, Error<D::Error>> {
        if self.find(directory, name)?.is_some() {
            return Err(OperationError::AlreadyExists.into());
        }
        Ok(1)
    }

    pub fn write_entries(
        &mut self,
        directory: &DirEntry,
        new: NewEntry,
    ) -> Result<DirEntry, Error<D::Error>> {
        let name = ShortName::parse(new.name)?;
        let location = match new.locations.last() {
            Some(&location) => location,
            None => return Err(DataError::Metadata.into()),
        };
        let attributes = if new.is_directory { ATTR_DIRECTORY } else { ATTR_ARCHIVE };
        let mut short = ShortEntry::new(&name, attributes);
        short.set_first_cluster(new.first_cluster);
        stamp(&mut short, new.now);
        if new.is_directory {
            let sector = self.core.geometry.cluster_sector(new.first_cluster);
            let mut dot = ShortEntry::new(&ShortName::DOT, ATTR_DIRECTORY);
            dot.set_first_cluster(new.first_cluster);
            stamp(&mut dot, new.now);
            let mut dot_dot = ShortEntry::new(&ShortName::DOT_DOT, ATTR_DIRECTORY);
            // Parent cluster of a directory directly under root is recorded as 0
            let parent = match directory.is_root() {
                true => ClusterID::ZERO,
                false => directory.first_cluster,
            };
            dot_dot.set_first_cluster(parent);
            stamp(&mut dot_dot, new.now);
            self.core.write_entry(EntryLocation { sector, index: 0 }, &raw_entry(&dot))?;
            self.core.write_entry(EntryLocation { sector, index: 1 }, &raw_entry(&dot_dot))?;
        }
        self.core.write_entry(location, &raw_entry(&short))?;
        let mut entry = self.to_entry(&short, new.locations, location);
        if new.is_directory {
            entry.capacity = self.core.geometry.cluster_size() as u64;
        }
        Ok(entry)
    }

    pub fn update(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        let mut short: ShortEntry = read(&self.core.read_entry(entry.id)?);
        short.set_first_cluster(entry.first_cluster);
        if !entry.is_directory() {
            let size = u32::try_from(entry.size).map_err(|_| InputError::Size)?;
            short.size = size.into();
            short.attributes |= ATTR_ARCHIVE;
        }
        let timestamp = entry.modified.timestamp;
        short.write_date = timestamp.fat_date().into();
        short.write_time = timestamp.fat_time().into();
        short.access_date = entry.accessed.timestamp.fat_date().into();
        self.core.write_entry(entry.id, &raw_entry(&short))
    }

    pub fn mark_deleted(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        for &location in entry.locations.iter() {
            let mut raw = self.core.read_entry(location)?;
            raw[0] = DELETED;
            self.core.write_entry(location, &raw)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), Error<D::Error>> {
        if let Some(sector) = self.fs_info {
            let core = &mut self.core;
            let free = core.allocator.free().unwrap_or(FsInfo::UNKNOWN);
            let next_free = u32::from(core.allocator.cursor());
            let mut info: FsInfo = read(core.cache.fetch(&mut core.io, sector)?);
            let changed = info.free_count.to_ne() != free || info.next_free.to_ne() != next_free;
            if info.is_valid() && changed {
                info.free_count = free.into();
                info.next_free = next_free.into();
                write(core.cache.fetch_mut(&mut core.io, sector, Intent::Update)?, &info);
            }
        }
        self.core.flush()
    }

    /// Empty root directory and FAT, leaving boot sector untouched
    pub fn wipe(&mut self) -> Result<(), Error<D::Error>> {
        if !self.core.opened.is_empty() {
            return Err(OperationError::AlreadyOpen.into());
        }
        let core = &mut self.core;
        let geometry = core.geometry;
        core.cache.invalidate_all();
        core.fat.clear(&mut core.io)?;
        let media = match geometry.fat_type {
            FatType::Fat12 => 0xF00,
            FatType::Fat16 => 0xFF00,
            _ => 0x0FFFFF00,
        } | self.media as u32;
        core.fat.set(&mut core.io, ClusterID::ZERO, Entry::Reserved(media))?;
        core.fat.set(&mut core.io, ClusterID::from(1), Entry::Last)?;
        match geometry.root {
            RootLocation::Region { sector, entries } => {
                let bytes = entries as u32 * 32;
                let sectors = (bytes + geometry.sector_size() - 1) / geometry.sector_size();
                for i in 0..sectors {
                    core.cache.fetch_mut(&mut core.io, sector + i, Intent::Overwrite)?;
                }
            }
            RootLocation::Cluster(cluster) => {
                core.fat.set(&mut core.io, cluster, Entry::Last)?;
                core.zero_cluster(cluster)?;
            }
        }
        core.allocator = Allocator::new(geometry.cluster_count, None);
        let cluster_count = geometry.cluster_count;
        let mut map = FatMap { io: &mut core.io, fat: &mut core.fat, cluster_count };
        let free = core.allocator.free_count(&mut map)?;
        if let Some(sector) = self.fs_info {
            let info = FsInfo::new(free, u32::from(core.allocator.cursor()));
            write(core.cache.fetch_mut(&mut core.io, sector, Intent::Overwrite)?, &info);
        }
        debug!("Volume wiped, {} clusters free", free);
        core.flush()
    }
}
