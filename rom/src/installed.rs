// Licensed under the Apache-2.0 license

//! The installed firmware record: one image header stored at a fixed,
//! page-aligned program memory address.

use crate::flash::{flash_crc32, FlashDrvError, FlashStorage};
use crate::platform::Watchdog;
use flash_image::{ImageHeader, IMAGE_HEADER_SIZE};
use log::debug;

/// Reads the record at `address`. Returns `Ok(None)` when the stored header is
/// not trusted (wrong magic or size), which includes erased memory.
pub fn read_installed_record<F: FlashStorage + ?Sized>(
    flash: &F,
    address: usize,
) -> Result<Option<ImageHeader>, FlashDrvError> {
    let mut raw = [0u8; IMAGE_HEADER_SIZE];
    flash.read(&mut raw, address)?;
    Ok(ImageHeader::decode_trusted(&raw))
}

/// Result of checking what is currently flashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledImage {
    pub header: Option<ImageHeader>,
    /// The payload described by `header` is present and its CRC matches.
    pub valid: bool,
}

impl InstalledImage {
    /// Reads the record and recomputes the CRC over
    /// `[load_address, load_address + binary_size)`, feeding the watchdog per
    /// chunk of `buffer.len()` bytes.
    ///
    /// Any read failure or an out-of-range payload is reported as invalid
    /// rather than as an error, since the caller only needs to know whether the
    /// installed firmware can be booted.
    pub fn check<F: FlashStorage + ?Sized>(
        flash: &F,
        record_address: usize,
        buffer: &mut [u8],
        watchdog: &mut dyn Watchdog,
    ) -> Self {
        let header = match read_installed_record(flash, record_address) {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!("No installed firmware record");
                return Self {
                    header: None,
                    valid: false,
                };
            }
            Err(e) => {
                debug!("Installed record unreadable: {}", e);
                return Self {
                    header: None,
                    valid: false,
                };
            }
        };
        let valid = match flash_crc32(
            flash,
            header.load_address() as usize,
            header.binary_size() as usize,
            buffer,
            watchdog,
        ) {
            Ok(crc) => crc == header.crc32(),
            Err(e) => {
                debug!("Installed payload unreadable: {}", e);
                false
            }
        };
        Self {
            header: Some(header),
            valid,
        }
    }
}
