use core::fmt::Debug;

use displaydoc::Display;
use thiserror::Error;

use crate::types::ClusterID;

#[derive(Copy, Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum FormatError {
    /// No FAT or exFAT filesystem found
    NoFilesystem,
    /// Boot sector signature mismatch
    Signature,
    /// Boot region checksum mismatch
    Checksum,
    /// Sector size {0} not matching the device
    SectorSize(u32),
    /// Inconsistent volume geometry
    Geometry,
    /// Unsupported filesystem feature: {0}
    Unsupported(&'static str),
    /// Allocation bitmap missing
    AllocationBitmapMissing,
    /// Upcase table missing
    UpcaseTableMissing,
    /// Partition {0} not present
    Partition(u8),
}

#[derive(Copy, Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum DataError {
    /// Cluster chain exceeds the number of clusters, probably a cycle
    ChainCycle,
    /// Cluster {0} out of range
    ClusterRange(ClusterID),
    /// Unexpected FAT entry on cluster {0}
    FatEntry(ClusterID),
    /// Directory entry corrupted
    Metadata,
}

#[derive(Copy, Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum InputError {
    /// Seek position out of range
    SeekPosition,
    /// Size out of range
    Size,
    /// Invalid name
    Name,
    /// Name too long
    NameTooLong,
}

#[derive(Copy, Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum OperationError {
    /// File or directory already open
    AlreadyOpen,
    /// File or directory already exists
    AlreadyExists,
    /// No such file or directory
    NotFound,
    /// Not a file
    NotFile,
    /// Not a directory
    NotDirectory,
    /// Directory not empty
    DirectoryNotEmpty,
    /// Fixed root directory is full
    DirectoryFull,
    /// Next cluster not contiguous
    Fragment,
}

#[derive(Debug, Display, Error)]
pub enum Error<E: Debug> {
    /// IO error: {0:?}
    IO(E),
    /// Volume not mounted
    NotMounted,
    /// Format error: {0}
    Format(#[from] FormatError),
    /// Disk full
    DiskFull,
    /// End of file
    EOF,
    /// Filesystem corrupted: {0}
    Corruption(#[from] DataError),
    /// Input error: {0}
    Input(#[from] InputError),
    /// Operation error: {0}
    Operation(#[from] OperationError),
}

