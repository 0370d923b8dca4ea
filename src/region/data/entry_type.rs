#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum EntryType {
    AllocationBitmap,
    UpcaseTable,
    VolumeLabel,
    FileDirectory,
    VolumeGUID,
    TexFATPadding,
    StreamExtension,
    Filename,
    VendorExtension,
    VendorAllocation,
}

impl TryFrom<u8> for EntryType {
    type Error = u8;
    fn try_from(byte: u8) -> Result<Self, u8> {
        let value = match byte {
            // critical primary
            0x1 => Self::AllocationBitmap,
            0x2 => Self::UpcaseTable,
            0x3 => Self::VolumeLabel,
            0x5 => Self::FileDirectory,
            // benign primary
            0x20 => Self::VolumeGUID,
            0x21 => Self::TexFATPadding,
            // critical secondary
            0x40 => Self::StreamExtension,
            0x41 => Self::Filename,
            // benign secondary
            0x60 => Self::VendorExtension,
            0x61 => Self::VendorAllocation,
            _ => return Err(byte),
        };
        Ok(value)
    }
}

impl From<EntryType> for u8 {
    fn from(entry_type: EntryType) -> u8 {
        match entry_type {
            EntryType::AllocationBitmap => 0x1,
            EntryType::UpcaseTable => 0x2,
            EntryType::VolumeLabel => 0x3,
            EntryType::FileDirectory => 0x5,
            EntryType::VolumeGUID => 0x20,
            EntryType::TexFATPadding => 0x21,
            EntryType::StreamExtension => 0x40,
            EntryType::Filename => 0x41,
            EntryType::VendorExtension => 0x60,
            EntryType::VendorAllocation => 0x61,
        }
    }
}

#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub(crate) struct RawEntryType(u8);

impl RawEntryType {
    pub(crate) fn new(entry_type: EntryType, in_use: bool) -> Self {
        Self(u8::from(entry_type) | if in_use { 0x80 } else { 0 })
    }

    pub(crate) fn in_use(&self) -> bool {
        self.0 & 0x80 > 0
    }

    pub(crate) fn entry_type(&self) -> Result<EntryType, u8> {
        EntryType::try_from(self.0 & 0x7F)
    }

    pub(crate) fn is_end_of_directory(&self) -> bool {
        self.0 == 0
    }

    pub(crate) fn is(&self, entry_type: EntryType) -> bool {
        self.in_use() && self.entry_type() == Ok(entry_type)
    }
}

impl From<u8> for RawEntryType {
    fn from(byte: u8) -> Self {
        Self(byte)
    }
}

impl From<RawEntryType> for u8 {
    fn from(raw: RawEntryType) -> u8 {
        raw.0
    }
}
