use crate::endian::Little as LE;
use crate::error::InputError;
use crate::region::Plain;
use crate::types::ClusterID;

pub(crate) const END_OF_DIRECTORY: u8 = 0x00;
pub(crate) const DELETED: u8 = 0xE5;
/// First name byte 0xE5 is stored as 0x05
const KANJI_LEAD: u8 = 0x05;

pub(crate) const ATTR_VOLUME_ID: u8 = 0x08;
pub(crate) const ATTR_DIRECTORY: u8 = 0x10;
pub(crate) const ATTR_ARCHIVE: u8 = 0x20;
pub(crate) const ATTR_LONG_NAME: u8 = 0x0F;

const CASE_LOWER_BASE: u8 = 0x08;
const CASE_LOWER_EXTENSION: u8 = 0x10;

/// FAT 8.3 directory entry
#[derive(Copy, Clone, Debug, Default)]
#[repr(C, packed(1))]
pub(crate) struct ShortEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub case: u8,
    pub create_tenth: u8,
    pub create_time: LE<u16>,
    pub create_date: LE<u16>,
    pub access_date: LE<u16>,
    pub first_cluster_high: LE<u16>,
    pub write_time: LE<u16>,
    pub write_date: LE<u16>,
    pub first_cluster_low: LE<u16>,
    pub size: LE<u32>,
}

unsafe impl Plain for ShortEntry {}

impl ShortEntry {
    pub fn new(name: &ShortName, attributes: u8) -> Self {
        Self { name: name.raw, attributes, case: name.case, ..Default::default() }
    }

    pub fn is_long_name(&self) -> bool {
        self.attributes & ATTR_LONG_NAME == ATTR_LONG_NAME
    }

    pub fn is_volume_label(&self) -> bool {
        !self.is_long_name() && self.attributes & ATTR_VOLUME_ID != 0
    }

    pub fn is_dot(&self) -> bool {
        self.name[0] == b'.'
    }

    pub fn first_cluster(&self) -> ClusterID {
        let high = self.first_cluster_high.to_ne() as u32;
        ClusterID::from((high << 16) | self.first_cluster_low.to_ne() as u32)
    }

    pub fn set_first_cluster(&mut self, cluster: ClusterID) {
        let value = u32::from(cluster);
        self.first_cluster_high = ((value >> 16) as u16).into();
        self.first_cluster_low = (value as u16).into();
    }

    pub fn short_name(&self) -> ShortName {
        ShortName { raw: self.name, case: self.case }
    }
}

/// Encoded 8.3 name with NT lowercase flags
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ShortName {
    pub raw: [u8; 11],
    pub case: u8,
}

fn valid_char(byte: u8) -> bool {
    match byte {
        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => true,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'-' => true,
        b'@' | b'^' | b'_' | b'`' | b'{' | b'}' | b'~' => true,
        _ => false,
    }
}

/// Returns (upper cased into `out`, all letters lowercase)
fn encode_part(part: &str, out: &mut [u8]) -> Result<bool, InputError> {
    if part.len() > out.len() {
        return Err(InputError::NameTooLong);
    }
    let (mut lower, mut upper) = (false, false);
    for (i, &byte) in part.as_bytes().iter().enumerate() {
        if !valid_char(byte) {
            return Err(InputError::Name);
        }
        lower |= byte.is_ascii_lowercase();
        upper |= byte.is_ascii_uppercase();
        out[i] = byte.to_ascii_uppercase();
    }
    if lower && upper {
        // Mixed case needs a long name
        return Err(InputError::Name);
    }
    Ok(lower)
}

impl ShortName {
    pub const DOT: Self = Self { raw: *b".          ", case: 0 };
    pub const DOT_DOT: Self = Self { raw: *b"..         ", case: 0 };

    pub fn parse(name: &str) -> Result<Self, InputError> {
        let (base, extension) = match name.rfind('.') {
            Some(index) => (&name[..index], &name[index + 1..]),
            None => (name, ""),
        };
        if base.is_empty() || (name.ends_with('.') && extension.is_empty()) {
            return Err(InputError::Name);
        }
        let mut raw = [b' '; 11];
        let mut case = 0;
        if encode_part(base, &mut raw[..8])? {
            case |= CASE_LOWER_BASE;
        }
        if encode_part(extension, &mut raw[8..])? {
            case |= CASE_LOWER_EXTENSION;
        }
        Ok(Self { raw, case })
    }

    /// Checksum recorded in each long name entry of this short name
    pub fn checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for &byte in self.raw.iter() {
            sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(byte);
        }
        sum
    }

    /// Case insensitive comparison
    pub fn matches(&self, other: &Self) -> bool {
        self.raw == other.raw
    }

    pub fn to_string<const N: usize>(&self) -> heapless::String<N> {
        let mut string = heapless::String::new();
        let push = |string: &mut heapless::String<N>, bytes: &[u8], lower: bool| {
            for (i, &byte) in bytes.iter().enumerate() {
                let byte = if i == 0 && byte == KANJI_LEAD { DELETED } else { byte };
                let ch = match lower {
                    true => byte.to_ascii_lowercase() as char,
                    false => byte as char,
                };
                string.push(ch).ok();
            }
        };
        let base = trim(&self.raw[..8]);
        push(&mut string, base, self.case & CASE_LOWER_BASE != 0);
        let extension = trim(&self.raw[8..]);
        if !extension.is_empty() {
            string.push('.').ok();
            push(&mut string, extension, self.case & CASE_LOWER_EXTENSION != 0);
        }
        string
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let length = bytes.iter().rposition(|&b| b != b' ').map(|i| i + 1).unwrap_or(0);
    &bytes[..length]
}
