use alloc::vec::Vec;
use core::fmt::Debug;

use crate::error::{Error, OperationError};
use crate::file::File;
use crate::io::BlockDevice;
use crate::partition::{DirEntry, Partition};
use crate::sync::{acquire, Shared};

pub enum FileOrDirectory<D: BlockDevice> {
    File(File<D>),
    Directory(Directory<D>),
}

impl<D: BlockDevice> FileOrDirectory<D> {
    pub fn entry(&self) -> &DirEntry {
        match self {
            Self::File(file) => file.entry(),
            Self::Directory(directory) => directory.entry(),
        }
    }
}

/// Registers `entry` as open, root directory is never registered
pub(crate) fn open_entry<D: BlockDevice>(
    partition: &Shared<Partition<D>>,
    entry: DirEntry,
) -> Result<FileOrDirectory<D>, Error<D::Error>> {
    if !entry.is_root() && !acquire!(partition).core_mut().opened.add(entry.id) {
        return Err(OperationError::AlreadyOpen.into());
    }
    let partition = partition.clone();
    Ok(match entry.is_directory() {
        true => FileOrDirectory::Directory(Directory::new(partition, entry)),
        false => FileOrDirectory::File(File::new(partition, entry)),
    })
}

pub struct Directory<D: BlockDevice> {
    partition: Shared<Partition<D>>,
    entry: DirEntry,
    closed: bool,
}

impl<D: BlockDevice> Directory<D> {
    pub(crate) fn new(partition: Shared<Partition<D>>, entry: DirEntry) -> Self {
        Self { partition, entry, closed: false }
    }

    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    /// Walk through directory until `f` returns true
    pub fn walk<F>(&mut self, f: F) -> Result<Option<DirEntry>, Error<D::Error>>
    where
        F: FnMut(&DirEntry) -> bool,
    {
        acquire!(self.partition).walk(&self.entry, f)
    }

    pub fn entries(&mut self) -> Result<Vec<DirEntry>, Error<D::Error>> {
        let mut entries = Vec::new();
        self.walk(|entry| {
            entries.push(entry.clone());
            false
        })?;
        Ok(entries)
    }

    /// Find a file or directory matching specified name
    pub fn find(&mut self, name: &str) -> Result<Option<DirEntry>, Error<D::Error>> {
        acquire!(self.partition).find(&self.entry, name)
    }

    pub fn open(&mut self, entry: &DirEntry) -> Result<FileOrDirectory<D>, Error<D::Error>> {
        open_entry(&self.partition, entry.clone())
    }

    /// Create an empty file or directory, which is not opened
    pub fn create(&mut self, name: &str, directory: bool) -> Result<DirEntry, Error<D::Error>> {
        let mut partition = acquire!(self.partition);
        let entry = partition.create(&mut self.entry, name, directory)?;
        partition.core_mut().flush()?;
        Ok(entry)
    }

    /// Deletes an entry that is not open, directories must be empty
    pub fn delete(&mut self, entry: &DirEntry) -> Result<(), Error<D::Error>> {
        let mut partition = acquire!(self.partition);
        partition.remove(entry)?;
        partition.core_mut().flush()
    }

    fn unregister(&mut self) {
        if !self.entry.is_root() {
            acquire!(self.partition).core_mut().opened.remove(self.entry.id);
        }
        self.closed = true;
    }

    pub fn close(mut self) {
        self.unregister()
    }
}

impl<D: BlockDevice> Debug for Directory<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Directory").field("name", &self.entry.name()).finish()
    }
}

impl<D: BlockDevice> Drop for Directory<D> {
    fn drop(&mut self) {
        if !self.closed {
            self.unregister();
        }
    }
}
