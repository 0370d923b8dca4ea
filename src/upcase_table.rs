/// exFAT up-case mapping for the first 128 code units, anything above maps to itself
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UpcaseTable([u16; 128]);

impl UpcaseTable {
    pub fn to_upper(&self, unit: u16) -> u16 {
        match self.0.get(unit as usize) {
            Some(&upper) => upper,
            None => unit,
        }
    }

    pub fn upcase<'a>(
        &'a self,
        units: impl Iterator<Item = u16> + 'a,
    ) -> impl Iterator<Item = u16> + 'a {
        units.map(move |unit| self.to_upper(unit))
    }

    pub fn equals(&self, left: &str, right: &str) -> bool {
        let left = self.upcase(left.encode_utf16());
        left.eq(self.upcase(right.encode_utf16()))
    }

    /// Decodes the head of an on-disk table, either plain or
    /// compressed where 0xFFFF is followed by a length of identity mappings
    pub fn decode(bytes: &[u8]) -> Self {
        let mut table = Self::default().0;
        let mut units = bytes.chunks_exact(2).map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]));
        let mut index = 0;
        while index < table.len() {
            let unit = match units.next() {
                Some(unit) => unit,
                None => break,
            };
            if unit != 0xFFFF {
                table[index] = unit;
                index += 1;
                continue;
            }
            let length = units.next().unwrap_or(0) as usize;
            let end = core::cmp::min(index + length, table.len());
            for (i, value) in table[index..end].iter_mut().enumerate() {
                *value = (index + i) as u16;
            }
            index += length;
        }
        Self(table)
    }
}

impl Default for UpcaseTable {
    fn default() -> Self {
        let mut table = [0u16; 128];
        for (i, value) in table.iter_mut().enumerate() {
            *value = (i as u8).to_ascii_uppercase() as u16;
        }
        Self(table)
    }
}

#[cfg(test)]
mod test {
    use super::UpcaseTable;

    #[test]
    fn test_default() {
        let table = UpcaseTable::default();
        assert_eq!(table.to_upper(b'a' as u16), b'A' as u16);
        assert_eq!(table.to_upper(b'z' as u16), b'Z' as u16);
        assert_eq!(table.to_upper(b'{' as u16), b'{' as u16);
        assert_eq!(table.to_upper(0x3B1), 0x3B1);
        assert!(table.equals("Hello.TXT", "hello.txt"));
        assert!(!table.equals("hello", "hello.txt"));
    }

    #[test]
    fn test_decode_compressed() {
        let mut bytes = [0u8; 512];
        // identity 0..0x61, then A..Z, then identity for the rest
        let mut words = alloc::vec![0xFFFF, 0x61];
        words.extend((b'A'..=b'Z').map(|b| b as u16));
        words.extend([0xFFFF, 128 - 0x7B]);
        for (i, word) in words.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        assert_eq!(UpcaseTable::decode(&bytes), UpcaseTable::default());
    }

    #[test]
    fn test_decode_plain() {
        let mut bytes = [0u8; 256];
        for i in 0..128u16 {
            let upper = (i as u8).to_ascii_uppercase() as u16;
            bytes[i as usize * 2..i as usize * 2 + 2].copy_from_slice(&upper.to_le_bytes());
        }
        assert_eq!(UpcaseTable::decode(&bytes), UpcaseTable::default());
    }
}
