/// Boot sector of FAT and exFAT volumes, FSInfo and MBR
pub(crate) mod boot;

/// FAT region entry encoding, shared by FAT12/16/32 and exFAT
pub(crate) mod fat;

/// Directory entries
pub(crate) mod data;

use core::mem::size_of;
use core::ptr;
use core::slice;

/// On-disk structure with no padding and no invalid bit pattern
pub(crate) unsafe trait Plain: Copy {}

/// Copy a plain structure out of raw bytes
pub(crate) fn read<T: Plain>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= size_of::<T>());
    unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

pub(crate) fn as_bytes<T: Plain>(value: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

/// Copy a plain structure into raw bytes
pub(crate) fn write<T: Plain>(bytes: &mut [u8], value: &T) {
    bytes[..size_of::<T>()].copy_from_slice(as_bytes(value))
}
