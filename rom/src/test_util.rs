// Licensed under the Apache-2.0 license

//! In-memory program memory and file storage used by the unit tests.

use crate::flash::{check_range, FlashDrvError, FlashStorage};
use crate::platform::Watchdog;
use crate::storage::{FileStorage, OpenFlags, StorageError, StoredFile};
use flash_image::{CrcTracker, ImageHeader};
use std::collections::HashMap;
use zerocopy::IntoBytes;

/// NOR-like program memory: erased bytes read `0xFF` and writes can only
/// clear bits.
pub struct MemFlash {
    data: Vec<u8>,
    page_size: usize,
    erases: usize,
    writes: usize,
    fail_erase: Option<usize>,
    corrupt: Option<usize>,
}

impl MemFlash {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        Self {
            data: vec![0xFF; capacity],
            page_size,
            erases: 0,
            writes: 0,
            fail_erase: None,
            corrupt: None,
        }
    }

    /// Places `bytes` at `address` without going through erase/write.
    pub fn load(&mut self, address: usize, bytes: &[u8]) {
        self.data[address..address + bytes.len()].copy_from_slice(bytes);
    }

    pub fn bytes(&self, address: usize, len: usize) -> &[u8] {
        &self.data[address..address + len]
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Makes the erase of the page containing `address` fail.
    pub fn fail_erase_at(&mut self, address: usize) {
        self.fail_erase = Some(address - address % self.page_size);
    }

    /// Flips the low bit of the byte at `address` whenever it is written,
    /// while still reporting success.
    pub fn corrupt_writes_at(&mut self, address: usize) {
        self.corrupt = Some(address);
    }
}

impl FlashStorage for MemFlash {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError> {
        check_range(self.data.len(), address, buffer.len())?;
        buffer.copy_from_slice(&self.data[address..address + buffer.len()]);
        Ok(())
    }

    fn erase_page(&mut self, address: usize) -> Result<(), FlashDrvError> {
        check_range(self.data.len(), address, 1)?;
        let page = address - address % self.page_size;
        if self.fail_erase == Some(page) {
            return Err(FlashDrvError::ERASE);
        }
        self.data[page..page + self.page_size].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn write_words(&mut self, address: usize, words: &[u32]) -> Result<(), FlashDrvError> {
        if address % 4 != 0 {
            return Err(FlashDrvError::INVAL);
        }
        check_range(self.data.len(), address, words.len() * 4)?;
        for (i, word) in words.iter().enumerate() {
            let at = address + i * 4;
            for (j, byte) in word.to_le_bytes().iter().enumerate() {
                self.data[at + j] &= byte;
            }
        }
        if let Some(bad) = self.corrupt {
            if (address..address + words.len() * 4).contains(&bad) {
                self.data[bad] ^= 0x01;
            }
        }
        self.writes += words.len();
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// Counts how often it was fed.
#[derive(Default)]
pub struct CountingWatchdog(pub usize);

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.0 += 1;
    }
}

/// Serializes a candidate file: header followed by payload.
pub fn image_file(header: &ImageHeader, payload: &[u8]) -> Vec<u8> {
    let mut file = header.as_bytes().to_vec();
    file.extend_from_slice(payload);
    file
}

pub struct MemFile {
    data: Vec<u8>,
    pos: usize,
    crc: CrcTracker,
    fail_read_at: Option<usize>,
    // Xored into the reported running CRC.
    crc_error: u32,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            crc: CrcTracker::new(),
            fail_read_at: None,
            crc_error: 0,
        }
    }

    fn advance(&mut self, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let end = core::cmp::min(self.pos + len, self.data.len());
        if let Some(at) = self.fail_read_at {
            if (self.pos..end).contains(&at) {
                return Err(StorageError::Io);
            }
        }
        let range = self.pos..end;
        self.crc.update(&self.data[range.clone()]);
        self.pos = end;
        Ok(range)
    }
}

impl StoredFile for MemFile {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StorageError> {
        let range = self.advance(buffer.len())?;
        let n = range.len();
        buffer[..n].copy_from_slice(&self.data[range]);
        Ok(n)
    }

    fn skip(&mut self, len: usize) -> Result<usize, StorageError> {
        Ok(self.advance(len)?.len())
    }

    fn rewind(&mut self) -> Result<(), StorageError> {
        self.pos = 0;
        self.crc = CrcTracker::new();
        Ok(())
    }

    fn crc32(&self) -> u32 {
        self.crc.value() ^ self.crc_error
    }

    fn reset_crc(&mut self) {
        self.crc = CrcTracker::new();
    }
}

#[derive(Default)]
pub struct MemStorage {
    files: HashMap<String, Vec<u8>>,
    fail_read_at: Option<usize>,
    fail_open: Option<StorageError>,
    crc_error: u32,
    pub opened: Vec<(String, OpenFlags)>,
}

impl MemStorage {
    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.to_string(), data);
    }

    /// Makes reads covering byte `offset` of any opened file fail.
    pub fn fail_reads_at(&mut self, offset: usize) {
        self.fail_read_at = Some(offset);
    }

    /// Makes every open fail with `err`.
    pub fn fail_open(&mut self, err: StorageError) {
        self.fail_open = Some(err);
    }

    /// Makes opened files report a running CRC that differs from the data.
    pub fn corrupt_crc(&mut self) {
        self.crc_error = 0x0000_0100;
    }
}

impl FileStorage for MemStorage {
    type File = MemFile;

    fn open(&mut self, name: &str, flags: OpenFlags) -> Result<MemFile, StorageError> {
        self.opened.push((name.to_string(), flags));
        if let Some(err) = self.fail_open {
            return Err(err);
        }
        let data = self.files.get(name).ok_or(StorageError::NotFound)?;
        let mut file = MemFile::new(data.clone());
        file.fail_read_at = self.fail_read_at;
        file.crc_error = self.crc_error;
        Ok(file)
    }
}
