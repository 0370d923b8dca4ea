pub(crate) mod generic;
pub(crate) mod primary;
pub(crate) mod secondary;

pub(crate) const ENTRY_SIZE: usize = 32;
pub(crate) type RawEntry = [u8; ENTRY_SIZE];

use primary::Checksum;

/// Set checksum over every entry of a set, bytes 2 and 3 of the leading entry skipped
pub(crate) fn checksum(entries: &[RawEntry]) -> u16 {
    let mut checksum = Checksum::default();
    for (index, entry) in entries.iter().enumerate() {
        for (i, &byte) in entry.iter().enumerate() {
            if index == 0 && (i == 2 || i == 3) {
                continue;
            }
            checksum.write(byte);
        }
    }
    checksum.sum()
}
