use thiserror::Error;

pub type Word = [u8; 3];

pub trait WordExt {
    fn as_u32(&self) -> u32;
}

impl WordExt for Word {
    fn as_u32(&self) -> u32 {
        let [a, b, c] = *self;
        u32::from_be_bytes([0, a, b, c])
    }
}

pub fn u32_to_word(i: u32) -> Word {
    let [_, a, b, c] = i.to_be_bytes();
    [a, b, c]
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryError {
    #[error("access of {len} byte(s) at {address:0>6X} is outside memory of {size:#X} bytes")]
    OutOfRange {
        address: u32,
        len: usize,
        size: usize,
    },
}

/// Byte addressable scratch image the loader stages text into before
/// patching it.
#[derive(Debug)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size].into_boxed_slice(),
        }
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(MemoryError::OutOfRange {
                address,
                len,
                size: self.bytes.len(),
            }),
        }
    }

    pub fn read_byte(&self, address: u32) -> Result<u8, MemoryError> {
        let range = self.range(address, 1)?;
        Ok(self.bytes[range.start])
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        let range = self.range(address, 1)?;
        self.bytes[range.start] = value;
        Ok(())
    }

    pub fn read_word(&self, address: u32) -> Result<Word, MemoryError> {
        let range = self.range(address, 3)?;
        let mut word = [0; 3];
        word.copy_from_slice(&self.bytes[range]);
        Ok(word)
    }

    /// Stores the low 24 bits of `value` big-endian.
    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(address, &u32_to_word(value))
    }

    pub fn read_bytes(&self, address: u32, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn word_ext() {
        let u: u32 = [0xFF, 0xFF, 0xFF].as_u32();
        assert_eq!(u, 0x00FFFFFF);
        let u: u32 = [0xAB, 0xCD, 0xEF].as_u32();
        assert_eq!(u, 0x00ABCDEF);
        let w: Word = u32_to_word(0x12CAFEBA);
        assert_eq!(w, [0xCA, 0xFE, 0xBA]);
    }

    #[test]
    fn starts_zeroed() {
        let memory = Memory::new(16);
        assert_eq!(memory.len(), 16);
        assert!(memory.read_bytes(0, 16).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn words_are_big_endian() {
        let mut memory = Memory::new(16);
        memory.write_word(4, 0x00102D).unwrap();
        assert_eq!(memory.read_byte(4).unwrap(), 0x00);
        assert_eq!(memory.read_byte(5).unwrap(), 0x10);
        assert_eq!(memory.read_byte(6).unwrap(), 0x2D);
        assert_eq!(memory.read_word(4).unwrap().as_u32(), 0x00102D);

        memory.clear();
        assert_eq!(memory.read_word(4).unwrap().as_u32(), 0);
    }

    #[test]
    fn out_of_range() {
        let mut memory = Memory::new(8);
        assert!(memory.write_byte(7, 1).is_ok());
        assert_eq!(
            memory.write_byte(8, 1),
            Err(MemoryError::OutOfRange {
                address: 8,
                len: 1,
                size: 8
            })
        );
        assert!(memory.read_word(6).is_err());
        assert!(memory.read_bytes(u32::MAX, 2).is_err());

        // A span that doesn't fit leaves memory untouched
        assert!(memory.write_bytes(6, &[9, 9, 9]).is_err());
        assert_eq!(memory.read_byte(6).unwrap(), 0);
        assert_eq!(memory.read_byte(7).unwrap(), 1);
    }
}
