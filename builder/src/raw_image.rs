// Licensed under the Apache-2.0 license

use std::ops::RangeInclusive;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address {address:#x} outside image buffer")]
pub struct CapacityExceeded {
    pub address: u64,
}

/// Bounded image buffer with a usage counter per byte.
///
/// Unwritten bytes hold the fill value. The lowest and highest written
/// addresses are tracked so the used window can be extracted afterwards.
pub struct RawImage {
    data: Vec<u8>,
    usage: Vec<u8>,
    bounds: Option<(usize, usize)>,
    bytes_written: usize,
}

impl RawImage {
    pub fn new(capacity: usize, fill: u8) -> Self {
        Self {
            data: vec![fill; capacity],
            usage: vec![0; capacity],
            bounds: None,
            bytes_written: 0,
        }
    }

    /// Checks that `len` bytes starting at `address` fit the buffer.
    pub fn check_range(&self, address: u64, len: usize) -> Result<(), CapacityExceeded> {
        let end = address.saturating_add(len as u64);
        if end > self.data.len() as u64 {
            return Err(CapacityExceeded {
                address: address.max(self.data.len() as u64),
            });
        }
        Ok(())
    }

    /// Stores `value` at `address`. Returns `true` if the address had already
    /// been written; the later value wins.
    pub fn write(&mut self, address: u64, value: u8) -> Result<bool, CapacityExceeded> {
        self.check_range(address, 1)?;
        let at = address as usize;
        let overlap = self.usage[at] != 0;
        self.usage[at] = self.usage[at].saturating_add(1);
        self.data[at] = value;
        self.bounds = Some(match self.bounds {
            Some((min, max)) => (min.min(at), max.max(at)),
            None => (at, at),
        });
        self.bytes_written += 1;
        Ok(overlap)
    }

    /// How often `address` was written, saturating at 255.
    pub fn usage(&self, address: usize) -> u8 {
        self.usage.get(address).copied().unwrap_or(0)
    }

    pub fn min_address(&self) -> Option<usize> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max_address(&self) -> Option<usize> {
        self.bounds.map(|(_, max)| max)
    }

    /// Number of byte writes, counting overwrites.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// The output window: `[min, max]`, or `[floor, max]` when a floor is given.
    /// A floor below `min` includes fill bytes. Returns `None` when nothing was
    /// written or the floor lies above `max`.
    pub fn window(&self, floor: Option<usize>) -> Option<RangeInclusive<usize>> {
        let (min, max) = self.bounds?;
        let start = floor.unwrap_or(min);
        if start > max {
            return None;
        }
        Some(start..=max)
    }

    pub fn slice(&self, range: RangeInclusive<usize>) -> &[u8] {
        &self.data[range]
    }
}
