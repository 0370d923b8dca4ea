#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

extern crate heapless;
#[macro_use]
extern crate log;

mod allocator;
pub mod cache;
pub mod directory;
mod endian;
pub mod error;
pub mod file;
pub mod geometry;
pub mod io;
mod partition;
mod region;
pub(crate) mod sync;
pub mod types;
mod upcase_table;
pub mod volume;

pub use directory::{Directory, FileOrDirectory};
pub use file::{File, FileOptions, SeekFrom, TouchOptions};
pub use partition::{DirEntry, EntryLocation, Layout};
pub use region::data::entryset::primary::{DateTime, FileAttributes, Timestamp, UTCOffset};
pub use volume::{MountOptions, MountState, Volume};
