use crate::chunk::SECTION_BLOCKS;

/// 4096 four-bit values packed two per byte, low nibble first.
#[derive(Clone, PartialEq, Eq)]
pub struct NibbleArray {
    data: Box<[u8; SECTION_BLOCKS / 2]>,
}

impl NibbleArray {
    pub fn new() -> Self {
        Self::filled(0)
    }

    pub fn filled(value: u8) -> Self {
        let value = value & 0xf;
        Self {
            data: Box::new([value << 4 | value; SECTION_BLOCKS / 2]),
        }
    }

    /// Builds an array from raw packed bytes. Returns `None` unless exactly 2048 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let data: [u8; SECTION_BLOCKS / 2] = bytes.try_into().ok()?;
        Some(Self {
            data: Box::new(data),
        })
    }

    pub fn get(&self, index: usize) -> u8 {
        let byte = self.data[index >> 1];
        if index & 1 == 0 {
            byte & 0xf
        } else {
            byte >> 4
        }
    }

    pub fn set(&mut self, index: usize, value: u8) {
        let byte = &mut self.data[index >> 1];
        let value = value & 0xf;
        if index & 1 == 0 {
            *byte = (*byte & 0xf0) | value;
        } else {
            *byte = (*byte & 0x0f) | value << 4;
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Default for NibbleArray {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn neighbouring_nibbles_are_independent() {
        let mut nibbles = NibbleArray::new();
        nibbles.set(10, 7);
        nibbles.set(11, 12);
        assert_eq!(nibbles.get(10), 7);
        assert_eq!(nibbles.get(11), 12);
        assert_eq!(nibbles.as_bytes()[5], 12 << 4 | 7);
        nibbles.set(10, 0);
        assert_eq!(nibbles.get(11), 12);
    }

    #[test]
    fn values_are_truncated_to_four_bits() {
        let mut nibbles = NibbleArray::filled(15);
        nibbles.set(0, 0x1f);
        assert_eq!(nibbles.get(0), 0xf);
        assert_eq!(nibbles.get(4095), 15);
    }

    #[test]
    fn from_bytes_requires_full_array() {
        assert!(NibbleArray::from_bytes(&[0u8; 2047]).is_none());
        assert!(NibbleArray::from_bytes(&[0u8; 2048]).is_some());
    }
}
