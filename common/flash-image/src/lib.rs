// Licensed under the Apache-2.0 license
#![cfg_attr(not(test), no_std)]

//! Firmware image header shared by the host image builder and the boot ROM.
//!
//! An image file is one [`ImageHeader`] immediately followed by
//! `binary_size` payload bytes. The same header, without payload, is stored
//! in program memory to describe the installed firmware.

pub mod crc;

pub use crc::{crc32, crc32_update, CrcTracker, CRC32_SEED};

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const IMAGE_HEADER_MAGIC: u32 = 0xE79B_9C4F;
pub const IMAGE_HEADER_SIZE: usize = core::mem::size_of::<ImageHeader>();
pub const IMAGE_HEADER_RESERVED: u32 = 0xFFFF_FFFF;

/// Header types understood by the image builder. Only type 0 exists.
pub const HEADER_TYPE_0: u32 = 0;

const _: () = assert!(IMAGE_HEADER_SIZE == 32);

#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
pub struct ImageHeader {
    pub magic: U32<LittleEndian>,
    pub header_size: U32<LittleEndian>,
    pub binary_size: U32<LittleEndian>,
    pub load_address: U32<LittleEndian>,
    pub crc32: U32<LittleEndian>,
    pub timestamp: U32<LittleEndian>,
    pub start_address: U32<LittleEndian>,
    pub reserved: U32<LittleEndian>,
}

impl ImageHeader {
    pub fn new(
        binary_size: u32,
        load_address: u32,
        crc32: u32,
        timestamp: u32,
        start_address: u32,
    ) -> Self {
        Self {
            magic: IMAGE_HEADER_MAGIC.into(),
            header_size: (IMAGE_HEADER_SIZE as u32).into(),
            binary_size: binary_size.into(),
            load_address: load_address.into(),
            crc32: crc32.into(),
            timestamp: timestamp.into(),
            start_address: start_address.into(),
            reserved: IMAGE_HEADER_RESERVED.into(),
        }
    }

    /// Decodes a header from the first 32 bytes of `bytes`.
    ///
    /// Returns `None` if fewer than 32 bytes are available. The result is not
    /// checked; call [`ImageHeader::is_trusted`] before relying on it.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes).ok().map(|(header, _)| header)
    }

    /// Decodes a header and discards it unless it is trusted.
    pub fn decode_trusted(bytes: &[u8]) -> Option<Self> {
        Self::decode(bytes).filter(Self::is_trusted)
    }

    /// A header is trusted when both the magic and the header size match.
    /// An untrusted header must be treated as absent.
    pub fn is_trusted(&self) -> bool {
        self.magic.get() == IMAGE_HEADER_MAGIC
            && self.header_size.get() == IMAGE_HEADER_SIZE as u32
    }

    pub fn binary_size(&self) -> u32 {
        self.binary_size.get()
    }

    pub fn load_address(&self) -> u32 {
        self.load_address.get()
    }

    pub fn crc32(&self) -> u32 {
        self.crc32.get()
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp.get()
    }

    pub fn start_address(&self) -> u32 {
        self.start_address.get()
    }

    /// The header as eight native words, in the order they are stored.
    pub fn to_words(&self) -> [u32; IMAGE_HEADER_SIZE / 4] {
        let bytes = self.as_bytes();
        core::array::from_fn(|i| {
            u32::from_le_bytes([
                bytes[i * 4],
                bytes[i * 4 + 1],
                bytes[i * 4 + 2],
                bytes[i * 4 + 3],
            ])
        })
    }
}
