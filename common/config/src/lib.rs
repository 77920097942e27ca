// Licensed under the Apache-2.0 license

#![cfg_attr(not(test), no_std)]

use thiserror::Error;

/// Largest erase page the boot ROM can stage in its chunk buffer.
pub const CHUNK_BUFFER_SIZE: usize = 4096;

/// Name of the candidate image on external storage.
pub const CANDIDATE_FILE_NAME: &str = "_firmware.bin";

/// Configures where the installed firmware record lives and how the update
/// flow behaves. These are the defaults that can be overridden by a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Page-aligned program memory address of the installed record.
    pub installed_record_address: u32,
    /// Erase granularity of program memory in bytes.
    pub page_size: usize,
    /// File name of the candidate image on external storage.
    pub candidate_name: &'static str,
    /// How many times the LED pattern is shown before falling back to the
    /// installed firmware.
    pub fallback_blinks: u32,
    /// Seconds to wait (blinking) after a fatal error before resetting.
    pub fatal_wait_seconds: u32,
}

pub const DEFAULT_UPDATE_CONFIG: UpdateConfig = UpdateConfig {
    installed_record_address: 0x000F_F000,
    page_size: 4096,
    candidate_name: CANDIDATE_FILE_NAME,
    fallback_blinks: 5,
    fatal_wait_seconds: 60,
};

impl Default for UpdateConfig {
    fn default() -> Self {
        DEFAULT_UPDATE_CONFIG
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpdateConfigError {
    #[error("page size is zero")]
    PageSizeZero,
    #[error("page size is not a multiple of the word size")]
    PageSizeNotWordMultiple,
    #[error("page size exceeds the chunk buffer")]
    PageSizeTooLarge,
    #[error("installed record address is not page aligned")]
    RecordNotPageAligned,
}

impl UpdateConfig {
    /// Checks the invariants the boot ROM relies on.
    pub fn validate(&self) -> Result<(), UpdateConfigError> {
        if self.page_size == 0 {
            return Err(UpdateConfigError::PageSizeZero);
        }
        if self.page_size % 4 != 0 {
            return Err(UpdateConfigError::PageSizeNotWordMultiple);
        }
        if self.page_size > CHUNK_BUFFER_SIZE {
            return Err(UpdateConfigError::PageSizeTooLarge);
        }
        if self.installed_record_address as usize % self.page_size != 0 {
            return Err(UpdateConfigError::RecordNotPageAligned);
        }
        Ok(())
    }
}
