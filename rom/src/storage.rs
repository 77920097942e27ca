// Licensed under the Apache-2.0 license

//! Interface to the external file storage holding the candidate image.
//!
//! The filesystem itself is provided by the platform; the boot ROM only
//! opens one file by name and reads it sequentially.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        const READ = 0x01;
        /// Keep a running CRC32 of all bytes read through the file.
        const CRC = 0x02;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("file not found")]
    NotFound,
    #[error("storage I/O error")]
    Io,
}

pub trait FileStorage {
    type File: StoredFile;

    /// Opens `name`. Returns `Err(StorageError::NotFound)` if it does not exist.
    fn open(&mut self, name: &str, flags: OpenFlags) -> Result<Self::File, StorageError>;
}

/// An open file descriptor, positioned by sequential reads.
pub trait StoredFile {
    /// Reads up to `buffer.len()` bytes. A return value smaller than the
    /// buffer means the end of the file was reached.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StorageError>;

    /// Advances the position by up to `len` bytes without copying data.
    fn skip(&mut self, len: usize) -> Result<usize, StorageError>;

    /// Moves the position back to the first byte of the file.
    fn rewind(&mut self) -> Result<(), StorageError>;

    /// Running CRC32 of every byte read or skipped since open, rewind or
    /// [`StoredFile::reset_crc`]. Only meaningful with [`OpenFlags::CRC`].
    fn crc32(&self) -> u32;

    fn reset_crc(&mut self);

    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Reads until `buffer` is full or the file ends. Returns the number of bytes
/// read.
pub fn read_full<S: StoredFile + ?Sized>(
    file: &mut S,
    buffer: &mut [u8],
) -> Result<usize, StorageError> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
