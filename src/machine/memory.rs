use super::error::RuntimeErrorKind;
use crate::backend::layout::WORD_SIZE;

/// Byte addressed little endian memory. Addresses below `data_start` belong to
/// the code segment and are not accessible as data.
#[derive(Debug)]
pub struct Memory {
    bytes: Vec<u8>,
    data_start: i32,
}

impl Memory {
    pub fn new(size: i32, data_start: i32) -> Self {
        Self {
            bytes: vec![0; size.max(0) as usize],
            data_start,
        }
    }

    pub fn size(&self) -> i32 {
        self.bytes.len() as i32
    }

    fn word_range(&self, address: i32) -> Result<std::ops::Range<usize>, RuntimeErrorKind> {
        if address < self.data_start || address > self.size() - WORD_SIZE {
            return Err(RuntimeErrorKind::InvalidAddress(address));
        }

        let start = address as usize;
        Ok(start..start + WORD_SIZE as usize)
    }

    pub fn read_word(&self, address: i32) -> Result<i32, RuntimeErrorKind> {
        let range = self.word_range(address)?;
        let mut word = [0; WORD_SIZE as usize];
        word.copy_from_slice(&self.bytes[range]);

        Ok(i32::from_le_bytes(word))
    }

    pub fn write_word(&mut self, address: i32, value: i32) -> Result<(), RuntimeErrorKind> {
        let range = self.word_range(address)?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes());

        Ok(())
    }

    pub fn write_words(&mut self, address: i32, words: &[i32]) -> Result<(), RuntimeErrorKind> {
        for (index, word) in words.iter().enumerate() {
            self.write_word(address + index as i32 * WORD_SIZE, *word)?;
        }

        Ok(())
    }
}
