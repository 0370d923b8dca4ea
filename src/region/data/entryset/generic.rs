use bitfield::bitfield;

bitfield! {
    /// General secondary flags
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Flags(u8);
    pub allocation_possible, set_allocation_possible: 0;
    /// Clusters are contiguous and FAT entries shall be ignored
    pub no_fat_chain, set_no_fat_chain: 1;
}
