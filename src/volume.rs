use alloc::vec;

use crate::directory::{open_entry, Directory, FileOrDirectory};
use crate::error::{Error, FormatError, InputError, OperationError};
use crate::file::File;
use crate::geometry::{FatType, Geometry};
use crate::io::BlockDevice;
use crate::partition::{DirEntry, ExFatPartition, FatPartition, Layout, Partition};
use crate::region::boot::{has_signature, BiosParameterBlock, BootSector, PartitionEntry};
use crate::region::read;
use crate::sync::{acquire, shared, try_unwrap, Shared};
use crate::types::{ClusterID, SectorID};

#[derive(Copy, Clone, Debug)]
pub struct MountOptions {
    /// Sectors held by the data and directory cache
    pub cache_depth: usize,
    /// Sectors held by the FAT cache
    pub fat_cache_depth: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self { cache_depth: 4, fat_cache_depth: 2 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Initializing,
    Mounted,
    /// Mount failed, the device can only be taken back with `try_free`
    Error,
}

enum State<D: BlockDevice> {
    Unmounted(D),
    Initializing,
    Mounted(Shared<Partition<D>>),
    Error(D),
}

#[derive(Copy, Clone)]
enum Kind {
    Fat,
    ExFat,
}

fn kind(sector: &[u8]) -> Option<Kind> {
    if read::<BootSector>(sector).is_exfat() {
        return Some(Kind::ExFat);
    }
    match has_signature(sector) && read::<BiosParameterBlock>(sector).is_fat() {
        true => Some(Kind::Fat),
        false => None,
    }
}

fn mount_as<D: BlockDevice>(
    io: D,
    kind: Kind,
    offset: SectorID,
    options: &MountOptions,
) -> Result<Partition<D>, (Error<D::Error>, D)> {
    match kind {
        Kind::ExFat => ExFatPartition::mount(io, offset, options).map(Partition::ExFat),
        Kind::Fat => FatPartition::mount(io, offset, options).map(Partition::Fat),
    }
}

/// Filesystem on sector 0 first, then the selected or first valid MBR partition
fn detect<D: BlockDevice>(
    mut io: D,
    index: Option<u8>,
    options: &MountOptions,
) -> Result<Partition<D>, (Error<D::Error>, D)> {
    let sector_size_shift = io.sector_size_shift();
    if !(9..=12).contains(&sector_size_shift) {
        let sector_size = 1u32 << core::cmp::min(sector_size_shift, 31);
        return Err((FormatError::SectorSize(sector_size).into(), io));
    }
    let mut sector = vec![0u8; 1 << sector_size_shift];
    if let Err(error) = io.read(SectorID::BOOT, &mut sector) {
        return Err((Error::IO(error), io));
    }
    match (kind(&sector), index) {
        (Some(kind), None) => return mount_as(io, kind, SectorID::BOOT, options),
        (Some(_), Some(index)) => return Err((FormatError::Partition(index).into(), io)),
        (None, _) if !has_signature(&sector) => return Err((FormatError::NoFilesystem.into(), io)),
        (None, _) => {}
    }
    let entry = match index {
        Some(index) => PartitionEntry::read(&sector, index).filter(|entry| entry.is_valid()),
        None => {
            (1..=4).filter_map(|index| PartitionEntry::read(&sector, index)).find(|e| e.is_valid())
        }
    };
    let entry = match (entry, index) {
        (Some(entry), _) => entry,
        (None, Some(index)) => return Err((FormatError::Partition(index).into(), io)),
        (None, None) => return Err((FormatError::NoFilesystem.into(), io)),
    };
    let offset = SectorID::from(entry.relative_sector.to_ne() as u64);
    debug!("Partition of type {:#x} at sector {}", entry.partition_type, offset);
    if let Err(error) = io.read(offset, &mut sector) {
        return Err((Error::IO(error), io));
    }
    match kind(&sector) {
        Some(kind) => mount_as(io, kind, offset, options),
        None => Err((FormatError::NoFilesystem.into(), io)),
    }
}

/// A FAT12/16/32 or exFAT filesystem on a block device
pub struct Volume<D: BlockDevice> {
    state: State<D>,
    options: MountOptions,
}

impl<D: BlockDevice> Volume<D> {
    pub fn new(io: D) -> Self {
        Self::with_options(io, MountOptions::default())
    }

    pub fn with_options(io: D, options: MountOptions) -> Self {
        Self { state: State::Unmounted(io), options }
    }

    pub fn state(&self) -> MountState {
        match self.state {
            State::Unmounted(_) => MountState::Unmounted,
            State::Initializing => MountState::Initializing,
            State::Mounted(_) => MountState::Mounted,
            State::Error(_) => MountState::Error,
        }
    }

    /// Mounts filesystem on sector 0, or the first valid partition of MBR
    pub fn mount(&mut self) -> Result<(), Error<D::Error>> {
        self.mount_with(None)
    }

    /// Mounts primary partition `index` in 1..=4 of MBR
    pub fn mount_partition(&mut self, index: u8) -> Result<(), Error<D::Error>> {
        self.mount_with(Some(index))
    }

    fn mount_with(&mut self, index: Option<u8>) -> Result<(), Error<D::Error>> {
        let io = match core::mem::replace(&mut self.state, State::Initializing) {
            State::Unmounted(io) => io,
            State::Mounted(partition) => {
                self.state = State::Mounted(partition);
                return Ok(());
            }
            state => {
                self.state = state;
                return Err(Error::NotMounted);
            }
        };
        match detect(io, index, &self.options) {
            Ok(partition) => {
                debug!("Mounted {:?}", partition);
                self.state = State::Mounted(shared(partition));
                Ok(())
            }
            Err((error, io)) => {
                warn!("Mount failed: {}", error);
                self.state = State::Error(io);
                Err(error)
            }
        }
    }

    fn partition(&self) -> Result<&Shared<Partition<D>>, Error<D::Error>> {
        match &self.state {
            State::Mounted(partition) => Ok(partition),
            _ => Err(Error::NotMounted),
        }
    }

    pub fn fat_type(&self) -> Result<FatType, Error<D::Error>> {
        Ok(acquire!(self.partition()?).fat_type())
    }

    pub fn geometry(&self) -> Result<Geometry, Error<D::Error>> {
        Ok(*acquire!(self.partition()?).geometry())
    }

    pub fn fat_start_sector(&self) -> Result<SectorID, Error<D::Error>> {
        Ok(self.geometry()?.fat_offset)
    }

    /// Sectors per FAT copy
    pub fn fat_length(&self) -> Result<u32, Error<D::Error>> {
        Ok(self.geometry()?.fat_length)
    }

    pub fn fat_count(&self) -> Result<u8, Error<D::Error>> {
        Ok(self.geometry()?.fat_count)
    }

    pub fn cluster_count(&self) -> Result<u32, Error<D::Error>> {
        Ok(self.geometry()?.cluster_count)
    }

    pub fn free_cluster_count(&self) -> Result<u32, Error<D::Error>> {
        acquire!(self.partition()?).free_cluster_count()
    }

    pub fn serial_number(&self) -> Result<u32, Error<D::Error>> {
        Ok(self.geometry()?.serial_number)
    }

    pub fn label(&self) -> Result<heapless::String<44>, Error<D::Error>> {
        let partition = acquire!(self.partition()?);
        let mut label = heapless::String::new();
        label.push_str(partition.label()).ok();
        Ok(label)
    }

    /// exFAT only
    pub fn is_dirty(&self) -> Result<bool, Error<D::Error>> {
        match &mut *acquire!(self.partition()?) {
            Partition::ExFat(partition) => partition.is_dirty(),
            Partition::Fat(_) => Err(FormatError::Unsupported("volume dirty flag on FAT").into()),
        }
    }

    /// exFAT only, written to device immediately
    pub fn set_dirty(&mut self, dirty: bool) -> Result<(), Error<D::Error>> {
        match &mut *acquire!(self.partition()?) {
            Partition::ExFat(partition) => {
                partition.set_dirty(dirty)?;
                partition.core.flush()
            }
            Partition::Fat(_) => Err(FormatError::Unsupported("volume dirty flag on FAT").into()),
        }
    }

    pub fn root_directory(&mut self) -> Result<Directory<D>, Error<D::Error>> {
        let shared = self.partition()?.clone();
        let root = acquire!(shared).root();
        Ok(Directory::new(shared, root))
    }

    /// Directory holding the last component of `path`, and that component
    fn parent<'a>(
        partition: &mut Partition<D>,
        path: &'a str,
    ) -> Result<(DirEntry, &'a str), Error<D::Error>> {
        let mut directory = partition.root();
        let mut components = path.split('/').filter(|component| !component.is_empty()).peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                return Ok((directory, component));
            }
            directory = match partition.find(&directory, component)? {
                Some(entry) if entry.is_directory() => entry,
                Some(_) => return Err(OperationError::NotDirectory.into()),
                None => return Err(OperationError::NotFound.into()),
            };
        }
        Ok((directory, ""))
    }

    fn lookup(partition: &mut Partition<D>, path: &str) -> Result<DirEntry, Error<D::Error>> {
        match Self::parent(partition, path)? {
            (directory, "") => Ok(directory),
            (directory, name) => {
                partition.find(&directory, name)?.ok_or(OperationError::NotFound.into())
            }
        }
    }

    /// Opens a file or directory by `/` separated path
    pub fn open(&mut self, path: &str) -> Result<FileOrDirectory<D>, Error<D::Error>> {
        let shared = self.partition()?.clone();
        let mut partition = acquire!(shared);
        let entry = Self::lookup(&mut partition, path)?;
        drop(partition);
        open_entry(&shared, entry)
    }

    /// Creates and opens an empty file, parent directories must exist
    pub fn create(&mut self, path: &str) -> Result<File<D>, Error<D::Error>> {
        let shared = self.partition()?.clone();
        let entry = self.create_entry(&shared, path, false)?;
        match open_entry(&shared, entry)? {
            FileOrDirectory::File(file) => Ok(file),
            FileOrDirectory::Directory(_) => Err(OperationError::NotFile.into()),
        }
    }

    pub fn mkdir(&mut self, path: &str) -> Result<DirEntry, Error<D::Error>> {
        let shared = self.partition()?.clone();
        self.create_entry(&shared, path, true)
    }

    fn create_entry(
        &self,
        shared: &Shared<Partition<D>>,
        path: &str,
        directory: bool,
    ) -> Result<DirEntry, Error<D::Error>> {
        let mut partition = acquire!(shared);
        let (mut parent, name) = Self::parent(&mut partition, path)?;
        if name.is_empty() {
            return Err(InputError::Name.into());
        }
        let entry = partition.create(&mut parent, name, directory)?;
        partition.core_mut().flush()?;
        Ok(entry)
    }

    /// Removes a file or an empty directory, which must not be open
    pub fn remove(&mut self, path: &str) -> Result<(), Error<D::Error>> {
        let mut partition = acquire!(self.partition()?);
        let entry = Self::lookup(&mut partition, path)?;
        partition.remove(&entry)?;
        partition.core_mut().flush()
    }

    /// Writes back allocation hints and every dirty sector, then syncs device
    pub fn sync(&mut self) -> Result<(), Error<D::Error>> {
        acquire!(self.partition()?).sync()
    }

    /// Discards every cached sector, dirty ones included
    pub fn invalidate(&mut self) -> Result<(), Error<D::Error>> {
        acquire!(self.partition()?).invalidate();
        Ok(())
    }

    /// Empties FAT and root directory of a FAT volume
    pub fn wipe(&mut self) -> Result<(), Error<D::Error>> {
        match &mut *acquire!(self.partition()?) {
            Partition::Fat(partition) => partition.wipe(),
            Partition::ExFat(_) => Err(FormatError::Unsupported("wipe on exFAT").into()),
        }
    }

    pub fn is_busy(&mut self) -> bool {
        match &mut self.state {
            State::Unmounted(io) | State::Error(io) => io.is_busy(),
            State::Mounted(partition) => acquire!(partition).core_mut().io.is_busy(),
            State::Initializing => true,
        }
    }

    /// Starts a new FAT linked chain, or appends to the one ending at `prev`
    pub fn allocate_cluster(
        &mut self,
        prev: Option<ClusterID>,
    ) -> Result<ClusterID, Error<D::Error>> {
        let mut layout = Layout::Chained;
        let cluster = acquire!(self.partition()?).allocate_cluster(prev, &mut layout, false)?;
        trace!("Cluster {} allocated after {:?}", cluster, prev);
        Ok(cluster)
    }

    /// Frees a FAT linked chain, returns number of clusters freed
    pub fn free_chain(&mut self, start: ClusterID) -> Result<u32, Error<D::Error>> {
        acquire!(self.partition()?).free_chain(start, Layout::Chained)
    }

    /// Successor of `cluster` in FAT, None at end of chain
    pub fn chain_next(&mut self, cluster: ClusterID) -> Result<Option<ClusterID>, Error<D::Error>> {
        acquire!(self.partition()?).core_mut().chain_next(cluster, Layout::Chained)
    }

    /// Syncs and hands the device back, fails while files or directories are still open
    pub fn try_free(self) -> Result<D, Self> {
        let Self { state, options } = self;
        let partition = match state {
            State::Unmounted(io) | State::Error(io) => return Ok(io),
            State::Mounted(partition) => partition,
            State::Initializing => return Err(Self { state: State::Initializing, options }),
        };
        let result = acquire!(partition).sync();
        if let Err(error) = result {
            warn!("Sync before unmount failed: {}", error);
        }
        match try_unwrap(partition) {
            Ok(partition) => Ok(partition.into_io()),
            Err(partition) => Err(Self { state: State::Mounted(partition), options }),
        }
    }
}
