// Licensed under the Apache-2.0 license

//! Host-side stand-ins for the device collaborators, so the boot ROM update
//! flow can run against a program memory image file and a directory that
//! plays the role of external storage.

use anyhow::{anyhow, bail, Result};
use boot_config::UpdateConfig;
use boot_rom::{
    check_range, FileStorage, FlashDrvError, FlashStorage, NoWatchdog, OpenFlags, StorageError,
    StoredFile, UpdateDecider, UpdateOutcome,
};
use flash_image::CrcTracker;
use log::info;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Program memory kept in a host buffer with NOR semantics: erase sets a page
/// to `0xFF` and writes can only clear bits.
pub struct FileFlash {
    data: Vec<u8>,
    page_size: usize,
}

impl FileFlash {
    pub fn erased(capacity: usize, page_size: usize) -> Self {
        Self {
            data: vec![0xFF; capacity],
            page_size,
        }
    }

    /// Loads a memory image. A missing file gives erased memory; a shorter
    /// file is padded with `0xFF`.
    pub fn load(path: &Path, capacity: usize, page_size: usize) -> Result<Self> {
        let mut flash = Self::erased(capacity, page_size);
        match fs::read(path) {
            Ok(contents) => {
                if contents.len() > capacity {
                    bail!(
                        "Memory image '{}' is {} bytes, larger than {} bytes",
                        path.display(),
                        contents.len(),
                        capacity
                    );
                }
                flash.data[..contents.len()].copy_from_slice(&contents);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("'{}' not found, starting with erased memory", path.display());
            }
            Err(e) => bail!("Cannot read '{}': {}", path.display(), e),
        }
        Ok(flash)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.data)
            .map_err(|e| anyhow!("Cannot write '{}': {}", path.display(), e))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl FlashStorage for FileFlash {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError> {
        check_range(self.data.len(), address, buffer.len())?;
        buffer.copy_from_slice(&self.data[address..address + buffer.len()]);
        Ok(())
    }

    fn erase_page(&mut self, address: usize) -> Result<(), FlashDrvError> {
        check_range(self.data.len(), address, 1)?;
        let page = address - address % self.page_size;
        let end = (page + self.page_size).min(self.data.len());
        self.data[page..end].fill(0xFF);
        Ok(())
    }

    fn write_words(&mut self, address: usize, words: &[u32]) -> Result<(), FlashDrvError> {
        if address % 4 != 0 {
            return Err(FlashDrvError::INVAL);
        }
        check_range(self.data.len(), address, words.len() * 4)?;
        for (word, dest) in words.iter().zip(self.data[address..].chunks_exact_mut(4)) {
            for (byte, cell) in word.to_le_bytes().iter().zip(dest.iter_mut()) {
                *cell &= byte;
            }
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// A host directory used as external file storage.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl FileStorage for DirStorage {
    type File = DirFile;

    fn open(&mut self, name: &str, flags: OpenFlags) -> Result<DirFile, StorageError> {
        if !flags.contains(OpenFlags::READ) {
            return Err(StorageError::Io);
        }
        let file = File::open(self.root.join(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::Io,
        })?;
        Ok(DirFile {
            file,
            crc: CrcTracker::new(),
            track_crc: flags.contains(OpenFlags::CRC),
        })
    }
}

pub struct DirFile {
    file: File,
    crc: CrcTracker,
    track_crc: bool,
}

impl StoredFile for DirFile {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StorageError> {
        let n = self.file.read(buffer).map_err(|_| StorageError::Io)?;
        if self.track_crc {
            self.crc.update(&buffer[..n]);
        }
        Ok(n)
    }

    fn skip(&mut self, len: usize) -> Result<usize, StorageError> {
        let mut scratch = [0u8; 256];
        let mut skipped = 0;
        while skipped < len {
            let want = scratch.len().min(len - skipped);
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                break;
            }
            skipped += n;
        }
        Ok(skipped)
    }

    fn rewind(&mut self) -> Result<(), StorageError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|_| StorageError::Io)?;
        self.crc = CrcTracker::new();
        Ok(())
    }

    fn crc32(&self) -> u32 {
        self.crc.value()
    }

    fn reset_crc(&mut self) {
        self.crc = CrcTracker::new();
    }
}

pub struct SimulateArgs<'a> {
    /// Program memory image, created if it does not exist.
    pub flash: &'a Path,
    /// Directory holding the candidate image.
    pub storage: &'a Path,
    pub capacity: usize,
    pub config: UpdateConfig,
}

/// Runs the boot ROM update decision once and stores the resulting program
/// memory back to `args.flash`.
pub fn simulate(args: &SimulateArgs) -> Result<UpdateOutcome> {
    let mut flash = FileFlash::load(args.flash, args.capacity, args.config.page_size)?;
    let mut storage = DirStorage::new(args.storage);
    let outcome = UpdateDecider::new(&mut flash, &mut storage, args.config)
        .map_err(|e| anyhow!("Invalid update configuration: {}", e))?
        .run(&mut NoWatchdog);
    flash.save(args.flash)?;
    info!("Status {}: {:?}", outcome.status_code(), outcome);
    Ok(outcome)
}
