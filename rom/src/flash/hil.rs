// Licensed under the Apache-2.0 license

//! Generic interface for program memory (internal flash) access.

use core::result::Result;
use thiserror::Error;

/// Page-erasable, word-writable program memory. It is expected that the
/// platform's non-volatile memory controller driver implements this trait.
///
/// Erase is assumed atomic at page level and writes atomic at word level. Any
/// error returned from these primitives is treated as fatal by the update
/// flow; no torn-write recovery is attempted.
pub trait FlashStorage {
    /// Read from program memory, filling the provided buffer with data.
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError>;

    /// Erase the page that contains `address`.
    fn erase_page(&mut self, address: usize) -> Result<(), FlashDrvError>;

    /// Write consecutive words starting at the word-aligned `address`.
    fn write_words(&mut self, address: usize, words: &[u32]) -> Result<(), FlashDrvError>;

    /// Write a single word at the word-aligned `address`.
    fn write_word(&mut self, address: usize, value: u32) -> Result<(), FlashDrvError> {
        self.write_words(address, &[value])
    }

    /// Erase page size in bytes.
    fn page_size(&self) -> usize;

    /// Returns the end of the addressable program memory in bytes.
    fn capacity(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[repr(usize)]
pub enum FlashDrvError {
    /// Generic failure condition
    #[error("flash operation failed")]
    FAIL = 1,
    /// An invalid parameter was passed, e.g. an unaligned word address
    #[error("invalid flash address")]
    INVAL = 6,
    /// The access is outside the program memory
    #[error("flash access out of range")]
    SIZE = 7,
    /// The controller did not complete the erase
    #[error("page erase failed")]
    ERASE = 14,
    /// Read-back after a write did not match
    #[error("flash write failed")]
    WRITE = 15,
}

impl From<FlashDrvError> for usize {
    fn from(err: FlashDrvError) -> usize {
        err as usize
    }
}

/// Packs `bytes` into little-endian words. A trailing partial word is padded
/// with the erased value `0xFF`. Returns the number of words produced.
pub fn pack_words(bytes: &[u8], words: &mut [u32]) -> usize {
    let count = bytes.len().div_ceil(4);
    for (word, chunk) in words.iter_mut().zip(bytes.chunks(4)) {
        let mut raw = [0xFFu8; 4];
        raw[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_le_bytes(raw);
    }
    count
}
