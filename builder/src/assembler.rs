// Licensed under the Apache-2.0 license

use crate::error::AssembleError;
use crate::hex_record::{HexRecord, RecordType};
use crate::raw_image::{CapacityExceeded, RawImage};
use flash_image::{crc32, ImageHeader};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Largest image the assembler accepts.
pub const DEFAULT_CAPACITY: usize = 2 * 1024 * 1024;
/// Value of bytes no record wrote.
pub const DEFAULT_FILL: u8 = 0xFF;
/// Overlap warnings printed before further ones are only counted.
pub const DEFAULT_MAX_WARNINGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerConfig {
    pub capacity: usize,
    pub fill: u8,
    pub max_warnings: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            fill: DEFAULT_FILL,
            max_warnings: DEFAULT_MAX_WARNINGS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub path: PathBuf,
    pub lines: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub files: Vec<FileStats>,
    pub total_lines: usize,
    pub bytes_written: usize,
    pub min_address: Option<usize>,
    pub max_address: Option<usize>,
    pub warnings: usize,
    /// Last start address seen in a start segment or start linear record.
    pub start_address: Option<u32>,
}

/// Accumulates any number of Intel-HEX inputs into one image buffer.
pub struct HexAssembler {
    config: AssemblerConfig,
    image: RawImage,
    files: Vec<FileStats>,
    total_lines: usize,
    warnings: usize,
    start_address: Option<u32>,
}

impl HexAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            image: RawImage::new(config.capacity, config.fill),
            config,
            files: Vec::new(),
            total_lines: 0,
            warnings: 0,
            start_address: None,
        }
    }

    pub fn add_file(&mut self, path: &Path) -> Result<usize, AssembleError> {
        let file = File::open(path).map_err(|source| AssembleError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Input file '{}'", path.display());
        let lines = self.add_reader(path, BufReader::new(file))?;
        info!("Input file '{}' OK, {} lines", path.display(), lines);
        Ok(lines)
    }

    /// Processes records from `reader` up to and including the end record.
    /// `path` is only used in messages. The address offset starts at zero for
    /// every input. Returns the number of records processed.
    pub fn add_reader<R: BufRead>(
        &mut self,
        path: &Path,
        reader: R,
    ) -> Result<usize, AssembleError> {
        let mut offset: u32 = 0;
        let mut lines = reader.split(b'\n');
        let mut line_no = 0;
        loop {
            let line = match lines.next() {
                Some(line) => line.map_err(|source| AssembleError::Read {
                    path: path.to_path_buf(),
                    source,
                })?,
                None => {
                    return Err(AssembleError::UnexpectedEof {
                        path: path.to_path_buf(),
                        line: line_no,
                    });
                }
            };
            line_no += 1;
            let record = HexRecord::parse(&line).map_err(|source| AssembleError::Record {
                path: path.to_path_buf(),
                line: line_no,
                source,
            })?;

            match record.record_type {
                RecordType::Data => self.write_data(path, line_no, offset, &record)?,
                RecordType::EndOfFile => {
                    self.total_lines += line_no;
                    self.files.push(FileStats {
                        path: path.to_path_buf(),
                        lines: line_no,
                    });
                    return Ok(line_no);
                }
                RecordType::ExtendedSegmentAddress => {
                    offset = (record.value_u16() as u32) << 4;
                    debug!("Segment offset {:#x}", offset);
                }
                RecordType::ExtendedLinearAddress => {
                    offset = (record.value_u16() as u32) << 16;
                    debug!("Linear offset {:#x}", offset);
                }
                RecordType::StartSegmentAddress | RecordType::StartLinearAddress => {
                    if let Some(start) = record.start_address() {
                        info!("Init address: {:#x}", start);
                        self.start_address = Some(start);
                    }
                }
            }
        }
    }

    fn write_data(
        &mut self,
        path: &Path,
        line: usize,
        offset: u32,
        record: &HexRecord,
    ) -> Result<(), AssembleError> {
        let capacity_error = |e: CapacityExceeded| AssembleError::Capacity {
            path: path.to_path_buf(),
            line,
            address: e.address,
        };
        let base = offset as u64 + record.address as u64;
        self.image.check_range(base, record.data.len()).map_err(capacity_error)?;
        for (i, value) in record.data.iter().enumerate() {
            let address = base + i as u64;
            let overlap = self.image.write(address, *value).map_err(capacity_error)?;
            if overlap {
                self.warnings += 1;
                if self.warnings <= self.config.max_warnings {
                    warn!("Overwriting memory at address {:#x}", address);
                }
            }
        }
        Ok(())
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn image(&self) -> &RawImage {
        &self.image
    }

    pub fn stats(&self) -> AssemblyStats {
        AssemblyStats {
            files: self.files.clone(),
            total_lines: self.total_lines,
            bytes_written: self.image.bytes_written(),
            min_address: self.image.min_address(),
            max_address: self.image.max_address(),
            warnings: self.warnings,
            start_address: self.start_address,
        }
    }

    /// Logs the summary printed after all inputs were read.
    pub fn log_summary(&self) {
        if self.warnings > 0 {
            warn!("{} warnings found", self.warnings);
        }
        if let (Some(min), Some(max)) = (self.image.min_address(), self.image.max_address()) {
            info!(
                "Input {} bytes (addr {:#x}..{:#x}), total {} lines",
                self.image.bytes_written(),
                min,
                max,
                self.total_lines
            );
        }
    }

    /// Extracts the output window. With `floor`, the window starts exactly at
    /// `floor` even if that is below the lowest written address.
    pub fn finish(&self, floor: Option<u32>) -> Result<AssembledImage<'_>, AssembleError> {
        if self.image.bytes_written() == 0 {
            return Err(AssembleError::NoData);
        }
        let window = self.image.window(floor.map(|f| f as usize)).ok_or(AssembleError::NoData)?;
        let load_address = *window.start() as u32;
        Ok(AssembledImage {
            load_address,
            data: self.image.slice(window),
        })
    }
}

impl Default for HexAssembler {
    fn default() -> Self {
        Self::new(AssemblerConfig::default())
    }
}

/// The contiguous payload produced by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembledImage<'a> {
    pub load_address: u32,
    pub data: &'a [u8],
}

impl AssembledImage<'_> {
    pub fn crc32(&self) -> u32 {
        crc32(self.data)
    }

    pub fn header(&self, timestamp: u32, start_address: u32) -> ImageHeader {
        ImageHeader::new(
            self.data.len() as u32,
            self.load_address,
            self.crc32(),
            timestamp,
            start_address,
        )
    }
}
