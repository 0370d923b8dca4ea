use alloc::vec;

use super::bitmap::{Bitmap, BitmapMap};
use super::{raw_entry, Core, DirEntry, EntryCursor, EntryLocation, Layout, NewEntry, MAX_ENTRIES};
use crate::cache::Intent;
use crate::error::{DataError, Error, FormatError, InputError, OperationError};
use crate::file::MAX_FILENAME_SIZE;
use crate::geometry::{FatType, Geometry, RootLocation};
use crate::io::BlockDevice;
use crate::region::boot::{BootChecksum, BootSector, VolumeFlags, SIGNATURE};
use crate::region::data::entry_type::{EntryType, RawEntryType};
use crate::region::data::entryset::primary::{name_hash, FileAttributes, FileDirectory};
use crate::region::data::entryset::secondary::{Filename, Secondary, StreamExtension};
use crate::region::data::entryset::{checksum, RawEntry};
use crate::region::data::{self, AllocationBitmap, Checksum, VolumeLabel};
use crate::region::fat::Entry;
use crate::region::read;
use crate::types::{ClusterID, SectorID};
use crate::upcase_table::UpcaseTable;
use crate::volume::MountOptions;

/// Longest name in UTF-16 code units
const MAX_NAME_UNITS: usize = 255;
const BOOT_REGION_SECTORS: u32 = 11;
const VOLUME_FLAGS_OFFSET: usize = 106;
const PERCENT_INUSE_OFFSET: usize = 112;

type Units = heapless::Vec<u16, MAX_NAME_UNITS>;

pub(crate) fn slot_is_free(entry: &RawEntry) -> bool {
    !RawEntryType::from(entry[0]).in_use()
}

/// UTF-16 units of a name valid on exFAT
fn encode_name(name: &str) -> Result<Units, InputError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(InputError::Name);
    }
    let invalid = |ch: char| ch.is_control() || "\"*/:<>?\\|".contains(ch);
    if name.chars().any(invalid) {
        return Err(InputError::Name);
    }
    let mut units = Units::new();
    for unit in name.encode_utf16() {
        units.push(unit).map_err(|_| InputError::NameTooLong)?;
    }
    Ok(units)
}

fn probe<D: BlockDevice>(io: &mut D, offset: SectorID) -> Result<(Geometry, u8), Error<D::Error>> {
    let sector_size_shift = io.sector_size_shift();
    let mut sector = vec![0u8; 1 << sector_size_shift];
    io.read(offset, &mut sector).map_err(Error::IO)?;
    let boot: BootSector = read(&sector);
    if !boot.is_exfat() || boot.boot_signature != SIGNATURE {
        return Err(FormatError::Signature.into());
    }
    let shift = boot.bytes_per_sector_shift;
    if !(9..=12).contains(&shift) || shift != sector_size_shift {
        return Err(FormatError::SectorSize(1u32.checked_shl(shift as u32).unwrap_or(0)).into());
    }
    if boot.sectors_per_cluster_shift > 25 - shift {
        return Err(FormatError::Geometry.into());
    }
    if boot.number_of_fats != 1 {
        return Err(FormatError::Unsupported("TexFAT").into());
    }

    let mut boot_checksum = BootChecksum::default();
    boot_checksum.write(0, &sector);
    let mut buf = vec![0u8; sector.len()];
    for i in 1..BOOT_REGION_SECTORS {
        io.read(offset + i, &mut buf).map_err(Error::IO)?;
        boot_checksum.write(i as usize, &buf);
    }
    io.read(offset + BOOT_REGION_SECTORS, &mut buf).map_err(Error::IO)?;
    let sum = boot_checksum.sum().to_le_bytes();
    if buf.chunks_exact(4).any(|chunk| chunk != &sum[..]) {
        warn!("Boot region checksum mismatch");
        return Err(FormatError::Checksum.into());
    }

    let volume_length = boot.volume_length.to_ne();
    let (fat_offset, fat_length) = (boot.fat_offset.to_ne(), boot.fat_length.to_ne());
    let heap_offset = boot.cluster_heap_offset.to_ne();
    let cluster_count = boot.cluster_count.to_ne();
    let spc_shift = boot.sectors_per_cluster_shift;
    let end = SectorID::from(io.num_sectors());
    if cluster_count == 0 || volume_length == 0 || offset + volume_length > end {
        return Err(FormatError::Geometry.into());
    }
    if ((fat_length as u64) << shift) / 4 < cluster_count as u64 + 2 {
        return Err(FormatError::Geometry.into());
    }
    if heap_offset as u64 + ((cluster_count as u64) << spc_shift) > volume_length {
        return Err(FormatError::Geometry.into());
    }
    let root = ClusterID::from(boot.first_cluster_of_root_directory.to_ne());
    if !root.valid() || root > ClusterID::FIRST + (cluster_count - 1) {
        return Err(FormatError::Geometry.into());
    }
    let geometry = Geometry {
        fat_type: FatType::ExFat,
        sector_size_shift,
        sectors_per_cluster_shift: spc_shift,
        volume_offset: offset,
        volume_length,
        fat_offset: offset + fat_offset,
        fat_length,
        fat_count: 1,
        heap_offset: offset + heap_offset,
        cluster_count,
        root: RootLocation::Cluster(root),
        serial_number: boot.volume_serial_number.to_ne(),
    };
    Ok((geometry, boot.percent_inuse))
}

/// Stream extension fields derived from an entry
fn fill_stream(stream: &mut Secondary<StreamExtension>, entry: &DirEntry) {
    let mut flags = stream.general_secondary_flags();
    flags.set_allocation_possible(true);
    let contiguous = matches!(entry.layout, Layout::Contiguous { .. });
    flags.set_no_fat_chain(entry.first_cluster.valid() && contiguous);
    stream.set_general_secondary_flags(flags);
    stream.first_cluster = u32::from(entry.first_cluster).into();
    stream.data_length = entry.capacity.into();
    stream.custom_defined.valid_data_length = entry.size.into();
}

fn write_checksum(entries: &mut [RawEntry]) {
    let sum = checksum(entries);
    entries[0][2..4].copy_from_slice(&sum.to_le_bytes());
}

pub(crate) struct ExFatPartition<D> {
    pub(crate) core: Core<D>,
    bitmap: Bitmap,
    upcase: UpcaseTable,
    label: heapless::String<44>,
    percent_inuse: u8,
}

impl<D: BlockDevice> ExFatPartition<D> {
    /// Device handed back on failure
    pub fn mount(
        mut io: D,
        offset: SectorID,
        options: &MountOptions,
    ) -> Result<Self, (Error<D::Error>, D)> {
        let (geometry, percent_inuse) = match probe(&mut io, offset) {
            Ok(probed) => probed,
            Err(error) => return Err((error, io)),
        };
        debug!("exFAT geometry {:?}", geometry);
        let bitmap =
            Bitmap::new(geometry.heap_offset, geometry.sector_size_shift, geometry.cluster_count);
        let mut partition = Self {
            core: Core::new(io, geometry, options, 1),
            bitmap,
            upcase: UpcaseTable::default(),
            label: heapless::String::new(),
            percent_inuse,
        };
        match partition.load() {
            Ok(()) => Ok(partition),
            Err(error) => Err((error, partition.core.io)),
        }
    }

    /// Locates allocation bitmap, upcase table and volume label in root directory
    fn load(&mut self) -> Result<(), Error<D::Error>> {
        let geometry = self.core.geometry;
        let root = match geometry.root {
            RootLocation::Cluster(cluster) => DirEntry::root(cluster),
            RootLocation::Region { .. } => return Err(FormatError::Geometry.into()),
        };
        let mut cursor = EntryCursor::new(self.core.region(&root));
        let (mut bitmap, mut upcase, mut label) = (None, None, None);
        while !cursor.is_end() {
            let raw = self.core.read_entry(cursor.location(&geometry))?;
            cursor.advance(&mut self.core)?;
            let entry_type = RawEntryType::from(raw[0]);
            if entry_type.is_end_of_directory() {
                break;
            }
            match entry_type {
                t if t.is(EntryType::AllocationBitmap) && bitmap.is_none() => {
                    bitmap = Some(read::<AllocationBitmap>(&raw))
                }
                t if t.is(EntryType::UpcaseTable) => upcase = Some(read::<data::UpcaseTable>(&raw)),
                t if t.is(EntryType::VolumeLabel) => label = Some(read::<VolumeLabel>(&raw)),
                _ => {}
            }
            if bitmap.is_some() && upcase.is_some() && label.is_some() {
                break;
            }
        }

        let bitmap = bitmap.ok_or(FormatError::AllocationBitmapMissing)?;
        let first = ClusterID::from(bitmap.first_cluster.to_ne());
        let length = bitmap.data_length.to_ne();
        if !geometry.contains(first) || length < (geometry.cluster_count as u64 + 7) / 8 {
            return Err(FormatError::Geometry.into());
        }
        let sector = geometry.cluster_sector(first);
        self.bitmap = Bitmap::new(sector, geometry.sector_size_shift, geometry.cluster_count);

        let upcase = upcase.ok_or(FormatError::UpcaseTableMissing)?;
        self.upcase = self.load_upcase(&upcase)?;
        if let Some(label) = label {
            self.label = label.into();
        }
        #[cfg(feature = "precise-allocation-counter")]
        self.free_cluster_count()?;
        Ok(())
    }

    fn load_upcase(&mut self, entry: &data::UpcaseTable) -> Result<UpcaseTable, Error<D::Error>> {
        let core = &mut self.core;
        let mut cluster = ClusterID::from(entry.first_cluster.to_ne());
        let mut remain = entry.data_length.to_ne();
        if remain == 0 {
            return Err(FormatError::Geometry.into());
        }
        let sector_size = core.geometry.sector_size() as u64;
        let mut checksum = Checksum::default();
        let mut table = None;
        for _ in 0..core.geometry.cluster_count {
            if !core.geometry.contains(cluster) {
                return Err(DataError::ClusterRange(cluster).into());
            }
            let sector = core.geometry.cluster_sector(cluster);
            for i in 0..core.geometry.sectors_per_cluster() {
                let bytes = core.cache.fetch(&mut core.io, sector + i)?;
                let length = core::cmp::min(remain, sector_size) as usize;
                checksum.write(&bytes[..length]);
                if table.is_none() {
                    table = Some(UpcaseTable::decode(&bytes[..length]));
                }
                remain -= length as u64;
                if remain == 0 {
                    break;
                }
            }
            if remain == 0 {
                break;
            }
            // Contiguous when not chained in FAT
            cluster = match core.fat.get(&mut core.io, cluster)? {
                Entry::Next(next) => next,
                _ => cluster + 1u32,
            };
        }
        if checksum.sum() != entry.table_checksum.to_ne() {
            warn!("Upcase table checksum mismatch");
            return Err(FormatError::Checksum.into());
        }
        Ok(table.unwrap_or_default())
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub fn is_dirty(&mut self) -> Result<bool, Error<D::Error>> {
        let core = &mut self.core;
        let bytes = core.cache.fetch(&mut core.io, core.geometry.volume_offset)?;
        let offset = VOLUME_FLAGS_OFFSET;
        Ok(VolumeFlags(u16::from_le_bytes([bytes[offset], bytes[offset + 1]])).volume_dirty())
    }

    pub fn set_dirty(&mut self, dirty: bool) -> Result<(), Error<D::Error>> {
        let core = &mut self.core;
        let sector = core.geometry.volume_offset;
        let bytes = core.cache.fetch_mut(&mut core.io, sector, Intent::Update)?;
        let offset = VOLUME_FLAGS_OFFSET;
        let mut flags = VolumeFlags(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]));
        flags.set_volume_dirty(dirty);
        bytes[offset..offset + 2].copy_from_slice(&flags.0.to_le_bytes());
        Ok(())
    }

    /// Contiguous layout is kept as long as the new cluster follows the run,
    /// otherwise the run is written into FAT as a chain
    pub fn allocate_cluster(
        &mut self,
        prev: Option<ClusterID>,
        layout: &mut Layout,
        dont_fragment: bool,
    ) -> Result<ClusterID, Error<D::Error>> {
        let core = &mut self.core;
        let mut map = BitmapMap { io: &mut core.io, cache: &mut core.cache, bitmap: &self.bitmap };
        let cluster = core.allocator.find(&mut map, prev)?;
        match (*layout, prev) {
            (Layout::Contiguous { count: 0, .. }, _) | (Layout::Contiguous { .. }, None) => {
                *layout = Layout::Contiguous { first: cluster, count: 1 };
            }
            (Layout::Contiguous { first, count }, Some(_)) if cluster == first + count => {
                *layout = Layout::Contiguous { first, count: count + 1 };
            }
            (Layout::Contiguous { first, count }, Some(_)) => {
                if dont_fragment {
                    return Err(OperationError::Fragment.into());
                }
                debug!("Contiguous run {}+{} fragmented by cluster {}", first, count, cluster);
                for i in 0..count {
                    let next = match i + 1 == count {
                        true => cluster,
                        false => first + (i + 1),
                    };
                    core.fat.set(&mut core.io, first + i, Entry::Next(next))?;
                }
                core.fat.set(&mut core.io, cluster, Entry::Last)?;
                *layout = Layout::Chained;
            }
            (Layout::Chained, prev) => {
                if dont_fragment && prev.is_some_and(|prev| cluster != prev + 1u32) {
                    return Err(OperationError::Fragment.into());
                }
                core.fat.set(&mut core.io, cluster, Entry::Last)?;
                if let Some(prev) = prev {
                    core.fat.set(&mut core.io, prev, Entry::Next(cluster))?;
                }
            }
        }
        self.bitmap.set(&mut core.cache, &mut core.io, cluster, true)?;
        core.allocator.commit(cluster);
        Ok(cluster)
    }

    pub fn allocate_run(
        &mut self,
        count: u32,
        layout: &mut Layout,
    ) -> Result<ClusterID, Error<D::Error>> {
        let core = &mut self.core;
        let mut map = BitmapMap { io: &mut core.io, cache: &mut core.cache, bitmap: &self.bitmap };
        let first = core.allocator.find_run(&mut map, count)?;
        for i in 0..count {
            self.bitmap.set(&mut core.cache, &mut core.io, first + i, true)?;
            core.allocator.commit(first + i);
        }
        *layout = Layout::Contiguous { first, count };
        Ok(first)
    }

    pub fn free_chain(&mut self, start: ClusterID, layout: Layout) -> Result<u32, Error<D::Error>> {
        let core = &mut self.core;
        let mut freed = 0;
        if let Layout::Contiguous { first, count } = layout {
            if count == 0 {
                return Ok(0);
            }
            if start < first || start - first >= count {
                warn!("Cluster {} outside contiguous run {}+{}", start, first, count);
                return Err(DataError::ClusterRange(start).into());
            }
            for offset in (start - first)..count {
                let cluster = first + offset;
                if !self.bitmap.is_used(&mut core.cache, &mut core.io, cluster)? {
                    break;
                }
                self.bitmap.set(&mut core.cache, &mut core.io, cluster, false)?;
                core.allocator.release(cluster);
                freed += 1;
            }
            return Ok(freed);
        }
        let mut cluster = start;
        for _ in 0..core.geometry.cluster_count {
            if !core.geometry.contains(cluster) {
                warn!("Cluster {} out of range", cluster);
                return Err(DataError::ClusterRange(cluster).into());
            }
            if !self.bitmap.is_used(&mut core.cache, &mut core.io, cluster)? {
                return Ok(freed);
            }
            let next = match core.fat.get(&mut core.io, cluster)? {
                Entry::Next(next) => Some(next),
                Entry::Last => None,
                entry => {
                    warn!("Unexpected FAT entry {:?} on cluster {}", entry, cluster);
                    return Err(DataError::FatEntry(cluster).into());
                }
            };
            self.bitmap.set(&mut core.cache, &mut core.io, cluster, false)?;
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
        let mut map = BitmapMap { io: &mut core.io, cache: &mut core.cache, bitmap: &self.bitmap };
        core.allocator.free_count(&mut map)
    }

    fn to_entry(
        &self,
        entries: &[RawEntry],
        locations: heapless::Vec<EntryLocation, MAX_ENTRIES>,
    ) -> DirEntry {
        let file: FileDirectory = read(&entries[0]);
        let stream: Secondary<StreamExtension> = read(&entries[1]);
        let name_length = stream.custom_defined.name_length as usize;
        let units = entries[2..]
            .iter()
            .filter(|entry| RawEntryType::from(entry[0]).is(EntryType::Filename))
            .flat_map(|entry| read::<Filename>(entry).filename)
            .map(|unit| unit.to_ne())
            .take(name_length);
        let mut name = heapless::String::<MAX_FILENAME_SIZE>::new();
        for ch in char::decode_utf16(units) {
            if name.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER)).is_err() {
                trace!("Name truncated to {}", name);
                break;
            }
        }
        let first_cluster = ClusterID::from(stream.first_cluster.to_ne());
        let capacity = stream.data_length();
        let layout = match first_cluster.valid() {
            false => Layout::EMPTY,
            true if stream.general_secondary_flags().no_fat_chain() => {
                let count = self.core.geometry.clusters_for(capacity) as u32;
                Layout::Contiguous { first: first_cluster, count: core::cmp::max(count, 1) }
            }
            true => Layout::Chained,
        };
        DirEntry {
            name,
            attributes: file.file_attributes(),
            first_cluster,
            size: stream.valid_data_length(),
            capacity,
            layout,
            created: file.create_timestamp(),
            modified: file.last_modified_timestamp(),
            accessed: file.last_accessed_timestamp(),
            id: locations[0],
            locations,
        }
    }

    /// Walks entry sets, `filter` on name length and hash skips
    /// sets that cannot match before their checksum and name are looked at
    fn walk_sets<F>(
        &mut self,
        directory: &DirEntry,
        filter: Option<(u8, u16)>,
        mut f: F,
    ) -> Result<Option<DirEntry>, Error<D::Error>>
    where
        F: FnMut(&DirEntry) -> bool,
    {
        let mut cursor = EntryCursor::new(self.core.region(directory));
        while !cursor.is_end() {
            let location = cursor.location(&self.core.geometry);
            let raw = self.core.read_entry(location)?;
            cursor.advance(&mut self.core)?;
            let entry_type = RawEntryType::from(raw[0]);
            if entry_type.is_end_of_directory() {
                break;
            }
            if !entry_type.is(EntryType::FileDirectory) {
                continue;
            }
            let secondary_count = raw[1] as usize;
            if !(2..=18).contains(&secondary_count) {
                warn!("Invalid secondary count {} at {:?}", secondary_count, location);
                return Err(DataError::Metadata.into());
            }
            let mut entries: heapless::Vec<RawEntry, MAX_ENTRIES> = heapless::Vec::new();
            let mut locations: heapless::Vec<EntryLocation, MAX_ENTRIES> = heapless::Vec::new();
            entries.push(raw).ok();
            locations.push(location).ok();
            for _ in 0..secondary_count {
                if cursor.is_end() {
                    warn!("Entry set at {:?} truncated", location);
                    return Err(DataError::Metadata.into());
                }
                let location = cursor.location(&self.core.geometry);
                entries.push(self.core.read_entry(location)?).ok();
                locations.push(location).ok();
                cursor.advance(&mut self.core)?;
            }
            if !RawEntryType::from(entries[1][0]).is(EntryType::StreamExtension) {
                warn!("Stream extension missing at {:?}", location);
                return Err(DataError::Metadata.into());
            }
            if let Some((length, hash)) = filter {
                let stream: Secondary<StreamExtension> = read(&entries[1]);
                let custom = stream.custom_defined;
                if custom.name_length != length || custom.name_hash.to_ne() != hash {
                    continue;
                }
            }
            let expected = u16::from_le_bytes([entries[0][2], entries[0][3]]);
            if checksum(&entries) != expected {
                warn!("Entry set checksum mismatch at {:?}", location);
                return Err(DataError::Metadata.into());
            }
            let entry = self.to_entry(&entries, locations);
            if f(&entry) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn walk<F: FnMut(&DirEntry) -> bool>(
        &mut self,
        directory: &DirEntry,
        f: F,
    ) -> Result<Option<DirEntry>, Error<D::Error>> {
        self.walk_sets(directory, None, f)
    }

    pub fn find(
        &mut self,
        directory: &DirEntry,
        name: &str,
    ) -> Result<Option<DirEntry>, Error<D::Error>> {
        let units = encode_name(name)?;
        let upcased: Units = self.upcase.upcase(units.iter().copied()).collect();
        let filter = Some((units.len() as u8, name_hash(&upcased)));
        let upcase = self.upcase.clone();
        self.walk_sets(directory, filter, |entry| upcase.equals(entry.name(), name))
    }

    /// Number of slots needed by `name`, which must not exist yet
    pub fn prepare(&mut self, directory: &DirEntry, name: &str) -> Result<usize, Error<D::Error>> {
        let units = encode_name(name)?;
        if self.find(directory, name)?.is_some() {
            return Err(OperationError::AlreadyExists.into());
        }
        Ok(2 + (units.len() + Filename::CHARACTERS - 1) / Filename::CHARACTERS)
    }

    pub fn write_entries(
        &mut self,
        _directory: &DirEntry,
        new: NewEntry,
    ) -> Result<DirEntry, Error<D::Error>> {
        let units = encode_name(new.name)?;
        let upcased: Units = self.upcase.upcase(units.iter().copied()).collect();
        let secondary_count = (new.locations.len() - 1) as u8;
        let attributes = FileAttributes::new(new.is_directory);
        let file = FileDirectory::new(secondary_count, attributes, new.now);

        let capacity = match new.is_directory {
            true => self.core.geometry.cluster_size() as u64,
            false => 0,
        };
        let mut entry = DirEntry {
            name: heapless::String::new(),
            attributes,
            first_cluster: new.first_cluster,
            size: capacity,
            capacity,
            layout: new.layout,
            created: new.now,
            modified: new.now,
            accessed: new.now,
            id: new.locations[0],
            locations: new.locations,
        };
        for ch in new.name.chars() {
            if entry.name.push(ch).is_err() {
                break;
            }
        }
        let mut stream = Secondary::<StreamExtension>::new(units.len() as u8, name_hash(&upcased));
        fill_stream(&mut stream, &entry);

        let mut entries: heapless::Vec<RawEntry, MAX_ENTRIES> = heapless::Vec::new();
        entries.push(raw_entry(&file)).ok();
        entries.push(raw_entry(&stream)).ok();
        for chunk in units.chunks(Filename::CHARACTERS) {
            entries.push(raw_entry(&Filename::new(chunk))).ok();
        }
        write_checksum(&mut entries);
        for (location, raw) in entry.locations.iter().zip(entries.iter()) {
            self.core.write_entry(*location, raw)?;
        }
        // Timestamps as truncated by the on-disk encoding
        entry.created = file.create_timestamp();
        entry.modified = file.last_modified_timestamp();
        entry.accessed = file.last_accessed_timestamp();
        Ok(entry)
    }

    pub fn update(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        if entry.locations.len() < 3 {
            return Err(DataError::Metadata.into());
        }
        let mut entries: heapless::Vec<RawEntry, MAX_ENTRIES> = heapless::Vec::new();
        for &location in entry.locations.iter() {
            entries.push(self.core.read_entry(location)?).ok();
        }
        let mut file: FileDirectory = read(&entries[0]);
        file.set_last_modified(entry.modified);
        file.set_last_accessed(entry.accessed);
        let mut stream: Secondary<StreamExtension> = read(&entries[1]);
        fill_stream(&mut stream, entry);
        entries[0] = raw_entry(&file);
        entries[1] = raw_entry(&stream);
        write_checksum(&mut entries);
        self.core.write_entry(entry.locations[0], &entries[0])?;
        self.core.write_entry(entry.locations[1], &entries[1])
    }

    pub fn mark_deleted(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        for &location in entry.locations.iter() {
            let mut raw = self.core.read_entry(location)?;
            raw[0] &= 0x7F;
            self.core.write_entry(location, &raw)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), Error<D::Error>> {
        let core = &mut self.core;
        if let Some(free) = core.allocator.free() {
            let cluster_count = core.geometry.cluster_count as u64;
            let percent = ((cluster_count - free as u64) * 100 / cluster_count) as u8;
            if percent != self.percent_inuse {
                let sector = core.geometry.volume_offset;
                let bytes = core.cache.fetch_mut(&mut core.io, sector, Intent::Update)?;
                bytes[PERCENT_INUSE_OFFSET] = percent;
                self.percent_inuse = percent;
            }
        }
        core.flush()
    }
}
