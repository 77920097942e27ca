// Licensed under the Apache-2.0 license

use crate::assembler::{AssemblerConfig, AssemblyStats, HexAssembler};
use crate::error::AssembleError;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use flash_image::{crc32, ImageHeader, HEADER_TYPE_0, IMAGE_HEADER_MAGIC, IMAGE_HEADER_SIZE};
use log::info;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zerocopy::{FromBytes, IntoBytes};

/// Header selection given as `TYPE[,START]`, e.g. `0,0x26000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpec {
    pub header_type: u32,
    /// Vector table address of the firmware, stored in the header.
    pub start_address: u32,
}

impl FromStr for HeaderSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header_type, start_address) = match s.split_once(',') {
            Some((t, start)) => (t, clap_num::maybe_hex::<u32>(start.trim())?),
            None => (s, 0),
        };
        Ok(HeaderSpec {
            header_type: clap_num::maybe_hex::<u32>(header_type.trim())?,
            start_address,
        })
    }
}

pub struct ImageCreateArgs<'a> {
    pub inputs: &'a [PathBuf],
    /// Output starts at this address instead of the lowest written one.
    pub low_address: Option<u32>,
    pub header: Option<HeaderSpec>,
    pub output: Option<&'a Path>,
    /// Header timestamp; the current time when not given.
    pub timestamp: Option<u32>,
    pub config: AssemblerConfig,
}

/// Assembles all inputs and, if an output is given, writes the optional
/// header followed by the payload window.
pub fn image_create(args: &ImageCreateArgs) -> Result<AssemblyStats, AssembleError> {
    if let Some(spec) = args.header {
        if spec.header_type != HEADER_TYPE_0 {
            return Err(AssembleError::UnknownHeaderType(spec.header_type));
        }
    }

    let mut assembler = HexAssembler::new(args.config);
    for input in args.inputs {
        assembler.add_file(input)?;
    }
    assembler.log_summary();
    let image = assembler.finish(args.low_address)?;

    if let Some(output) = args.output {
        info!(
            "Write '{}', {} bytes (addr {:#x}..{:#x})",
            output.display(),
            image.data.len(),
            image.load_address,
            image.load_address as usize + image.data.len() - 1
        );
        let header = args.header.map(|spec| {
            let timestamp = args
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp() as u32);
            let header = image.header(timestamp, spec.start_address);
            info!(
                "Header type 0: vector table at {:#x}, timestamp {:#x}",
                spec.start_address, timestamp
            );
            header
        });
        write_image(output, header.as_ref(), image.data)?;
    }
    Ok(assembler.stats())
}

pub fn write_image(
    path: &Path,
    header: Option<&ImageHeader>,
    payload: &[u8],
) -> Result<(), AssembleError> {
    let write_error = |source: std::io::Error| AssembleError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(write_error)?;
    if let Some(header) = header {
        file.write_all(header.as_bytes()).map_err(write_error)?;
    }
    file.write_all(payload).map_err(write_error)?;
    Ok(())
}

/// Checks that `image` is a header followed by exactly the payload it
/// describes.
pub fn verify_image(image: &[u8]) -> Result<ImageHeader> {
    if image.len() < IMAGE_HEADER_SIZE {
        bail!("Image too small to contain the header.");
    }
    let (header, payload) = ImageHeader::read_from_prefix(image)
        .map_err(|_| anyhow!("Failed to parse header"))?;
    if header.magic.get() != IMAGE_HEADER_MAGIC {
        bail!(
            "Invalid header: incorrect magic number {:#010x}.",
            header.magic.get()
        );
    }
    if !header.is_trusted() {
        bail!("Invalid header: header size {}.", header.header_size.get());
    }
    if payload.len() != header.binary_size() as usize {
        bail!(
            "Payload size mismatch: header declares {} bytes, file holds {}.",
            header.binary_size(),
            payload.len()
        );
    }
    let computed = crc32(payload);
    if computed != header.crc32() {
        bail!(
            "CRC mismatch: header {:#010x}, payload {:#010x}.",
            header.crc32(),
            computed
        );
    }
    Ok(header)
}

pub fn image_verify(path: &Path) -> Result<ImageHeader> {
    let data = fs::read(path)
        .map_err(|e| anyhow!("Failed to read file '{}': {}", path.display(), e))?;
    let header = verify_image(&data)?;
    println!("Image is valid!");
    Ok(header)
}

/// Human readable description of an image header.
pub fn describe_header(header: &ImageHeader) -> String {
    let timestamp = DateTime::<Utc>::from_timestamp(header.timestamp() as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "invalid".to_string());
    format!(
        "magic:         {:#010x}\n\
         header size:   {}\n\
         binary size:   {}\n\
         load address:  {:#x}\n\
         crc32:         {:#010x}\n\
         timestamp:     {} ({})\n\
         start address: {:#x}\n",
        header.magic.get(),
        header.header_size.get(),
        header.binary_size(),
        header.load_address(),
        header.crc32(),
        header.timestamp(),
        timestamp,
        header.start_address(),
    )
}

pub fn image_info(path: &Path) -> Result<()> {
    let data = fs::read(path)
        .map_err(|e| anyhow!("Failed to read file '{}': {}", path.display(), e))?;
    let header = ImageHeader::read_from_prefix(&data)
        .map(|(header, _)| header)
        .map_err(|_| anyhow!("Image too small to contain the header."))?;
    print!("{}", describe_header(&header));
    Ok(())
}
