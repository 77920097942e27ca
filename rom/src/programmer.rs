// Licensed under the Apache-2.0 license

use crate::error::UpdateError;
use crate::flash::{check_range, FlashDrvError, FlashPartition, FlashStorage};
use crate::platform::Watchdog;
use crate::storage::{read_full, StoredFile};
use boot_config::CHUNK_BUFFER_SIZE;
use flash_image::{ImageHeader, IMAGE_HEADER_SIZE};
use log::{debug, info};

/// Writes a verified candidate into program memory.
pub struct FlashProgrammer<'a, F: FlashStorage + ?Sized> {
    flash: &'a mut F,
    record_address: usize,
}

impl<'a, F: FlashStorage + ?Sized> FlashProgrammer<'a, F> {
    pub fn new(flash: &'a mut F, record_address: usize) -> Self {
        Self {
            flash,
            record_address,
        }
    }

    /// Checks that the payload fits program memory and does not overlap the
    /// installed record page.
    pub fn check_fits(&self, header: &ImageHeader) -> Result<(), UpdateError> {
        let load = header.load_address() as usize;
        let size = header.binary_size() as usize;
        check_range(self.flash.capacity(), load, size).map_err(|_| UpdateError::OutOfRange)?;
        if load % 4 != 0 {
            return Err(UpdateError::OutOfRange);
        }
        let record_end = self.record_address + self.flash.page_size();
        if size > 0 && load < record_end && self.record_address < load + size {
            return Err(UpdateError::OutOfRange);
        }
        Ok(())
    }

    /// Copies the payload of `file` to `header.load_address()` and then stores
    /// `header` as the installed record.
    ///
    /// The file is rewound and its header skipped, then the payload is read in
    /// chunks of one erase page. Each chunk's pages are erased before the chunk
    /// is written as whole words. Flash failures are returned as-is; nothing
    /// is retried or rolled back.
    pub fn program<S: StoredFile + ?Sized>(
        &mut self,
        header: &ImageHeader,
        file: &mut S,
        watchdog: &mut dyn Watchdog,
    ) -> Result<(), UpdateError> {
        self.check_fits(header)?;

        file.rewind()?;
        let skipped = file.skip(IMAGE_HEADER_SIZE)?;
        if skipped != IMAGE_HEADER_SIZE {
            return Err(UpdateError::MalformedHeader { read: skipped });
        }

        let total = header.binary_size() as usize;
        let chunk = core::cmp::min(self.flash.page_size(), CHUNK_BUFFER_SIZE);
        let mut buffer = [0u8; CHUNK_BUFFER_SIZE];
        let mut words = [0u32; CHUNK_BUFFER_SIZE / 4];

        info!("Programming {} bytes at {:#x}", total, header.load_address());
        {
            let mut partition = FlashPartition::new(
                &mut *self.flash,
                "application",
                header.load_address() as usize,
                total,
            )
            .map_err(|e| match e {
                FlashDrvError::SIZE | FlashDrvError::INVAL => UpdateError::OutOfRange,
                e => UpdateError::Flash(e),
            })?;

            let mut offset = 0;
            while offset < total {
                let n = core::cmp::min(chunk, total - offset);
                let got = read_full(file, &mut buffer[..n])?;
                if got != n {
                    return Err(UpdateError::ShortRead {
                        expected: total as u32,
                        read: (offset + got) as u32,
                    });
                }
                partition.erase(offset, n)?;
                partition.write(offset, &buffer[..n], &mut words)?;
                watchdog.feed();
                offset += n;
            }
        }

        debug!("Writing installed record at {:#x}", self.record_address);
        self.flash.erase_page(self.record_address)?;
        self.flash.write_words(self.record_address, &header.to_words())?;
        watchdog.feed();
        Ok(())
    }
}
