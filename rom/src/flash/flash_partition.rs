// Licensed under the Apache-2.0 license

use crate::flash::hil::{pack_words, FlashDrvError, FlashStorage};
use crate::platform::Watchdog;
use flash_image::CrcTracker;
use log::debug;

/// Returns `Err(FlashDrvError::SIZE)` unless `[base, base + length)` lies inside
/// program memory of the given capacity.
pub fn check_range(capacity: usize, base: usize, length: usize) -> Result<(), FlashDrvError> {
    match base.checked_add(length) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(FlashDrvError::SIZE),
    }
}

/// Streams `[base, base + length)` of program memory through a fresh
/// [`CrcTracker`], reading `buffer.len()` bytes at a time and feeding the
/// watchdog once per chunk.
pub fn flash_crc32<F: FlashStorage + ?Sized>(
    flash: &F,
    base: usize,
    length: usize,
    buffer: &mut [u8],
    watchdog: &mut dyn Watchdog,
) -> Result<u32, FlashDrvError> {
    check_range(flash.capacity(), base, length)?;
    let mut tracker = CrcTracker::new();
    let mut offset = 0;
    while offset < length {
        let n = core::cmp::min(buffer.len(), length - offset);
        flash.read(&mut buffer[..n], base + offset)?;
        tracker.update(&buffer[..n]);
        watchdog.feed();
        offset += n;
    }
    Ok(tracker.value())
}

/// A writable window of program memory.
///
/// A `FlashPartition` provides a view into a contiguous region of the
/// underlying flash and checks every access against its bounds. Pages are
/// erased at most once per partition instance, so writing a region whose start
/// is not page aligned never erases data written by an earlier chunk.
pub struct FlashPartition<'a, F: FlashStorage + ?Sized> {
    driver: &'a mut F,
    name: &'static str,
    base_offset: usize,
    length: usize,
    // End of the highest page erased so far, as an absolute address.
    erased_end: usize,
}

impl<'a, F: FlashStorage + ?Sized> FlashPartition<'a, F> {
    /// Creates a new `FlashPartition` instance.
    ///
    /// Returns `Err(FlashDrvError::SIZE)` if the partition exceeds the flash
    /// size and `Err(FlashDrvError::INVAL)` if the base is not word aligned.
    pub fn new(
        driver: &'a mut F,
        name: &'static str,
        base_offset: usize,
        length: usize,
    ) -> Result<Self, FlashDrvError> {
        check_range(driver.capacity(), base_offset, length)?;
        if base_offset % 4 != 0 {
            return Err(FlashDrvError::INVAL);
        }
        Ok(FlashPartition {
            driver,
            name,
            base_offset,
            length,
            erased_end: base_offset,
        })
    }

    /// Erases every page touched by `[partition_offset, partition_offset + len)`
    /// that has not been erased through this partition yet.
    pub fn erase(&mut self, partition_offset: usize, len: usize) -> Result<(), FlashDrvError> {
        if partition_offset + len > self.length {
            return Err(FlashDrvError::SIZE);
        }
        let page_size = self.driver.page_size();
        let start = self.base_offset + partition_offset;
        let end = start + len;
        let mut page = start - start % page_size;
        while page < end {
            if page + page_size > self.erased_end {
                debug!("{}: erase page {:#x}", self.name, page);
                self.driver.erase_page(page)?;
                self.erased_end = page + page_size;
            }
            page += page_size;
        }
        Ok(())
    }

    /// Writes `buf` as whole words at `partition_offset`, padding the last
    /// word with the erased value. `scratch` must hold at least
    /// `buf.len().div_ceil(4)` words.
    pub fn write(
        &mut self,
        partition_offset: usize,
        buf: &[u8],
        scratch: &mut [u32],
    ) -> Result<(), FlashDrvError> {
        let padded = buf.len().next_multiple_of(4);
        if partition_offset % 4 != 0 || scratch.len() * 4 < padded {
            return Err(FlashDrvError::INVAL);
        }
        if partition_offset + padded > self.length.next_multiple_of(4) {
            return Err(FlashDrvError::SIZE);
        }
        let count = pack_words(buf, scratch);
        self.driver
            .write_words(self.base_offset + partition_offset, &scratch[..count])
    }

}
