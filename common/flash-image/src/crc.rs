// Licensed under the Apache-2.0 license

//! Incremental CRC32 shared by the image builder and the boot ROM.
//!
//! This is the reflected CRC32 (polynomial `0xEDB88320`) seeded with
//! `0xFFFFFFFF` and **without** the final complement, i.e. CRC-32/JAMCRC.
//! The value therefore equals `!crc32_ieee(data)`; both sides of the update
//! protocol must use this exact variant.

use crc::{Crc, NoTable, CRC_32_JAMCRC};

pub const CRC32_SEED: u32 = 0xFFFF_FFFF;

// Bitwise implementation, the ROM has no room for lookup tables.
const CRC32: Crc<u32, NoTable> = Crc::<u32, NoTable>::new(&CRC_32_JAMCRC);

/// Folds `data` into a running CRC value.
fn fold(crc: u32, data: &[u8]) -> u32 {
    // A reflected digest takes its initial register in unreflected form.
    let mut digest = CRC32.digest_with_initial(crc.reverse_bits());
    digest.update(data);
    digest.finalize()
}

/// Folds one byte into a running CRC value.
#[inline]
pub fn crc32_update(crc: u32, byte: u8) -> u32 {
    fold(crc, &[byte])
}

/// Running CRC32 state. Feed data in any number of chunks; the result only
/// depends on the concatenated bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcTracker {
    value: u32,
}

impl Default for CrcTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CrcTracker {
    pub const fn new() -> Self {
        Self { value: CRC32_SEED }
    }

    /// Continues from a previously saved running value.
    pub const fn resume(value: u32) -> Self {
        Self { value }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = fold(self.value, data);
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

/// One-shot CRC over a complete buffer.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
