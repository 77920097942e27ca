// Licensed under the Apache-2.0 license

pub mod flash_partition;
pub mod hil;

pub use flash_partition::{check_range, flash_crc32, FlashPartition};
pub use hil::{FlashDrvError, FlashStorage};
