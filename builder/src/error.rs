// Licensed under the Apache-2.0 license

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problem with a single Intel-HEX line, independent of where it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing ':'")]
    MissingColon,
    #[error("invalid hex digit")]
    InvalidHex,
    #[error("record length does not match its byte count")]
    LengthMismatch,
    #[error("checksum error")]
    Checksum,
    #[error("unknown record type {0:#04x}")]
    UnknownType(u8),
    #[error("record type {0:#04x} needs {1} data bytes")]
    BadPayload(u8, usize),
    #[error("end record without trailing 'FF'")]
    BadEndRecord,
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("can't open '{}': {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("read error in '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("unexpected end of '{}' in line {line}", .path.display())]
    UnexpectedEof { path: PathBuf, line: usize },
    #[error("{source} in '{}' line {line}", .path.display())]
    Record {
        path: PathBuf,
        line: usize,
        source: RecordError,
    },
    #[error("illegal write at address {address:#x} in '{}' line {line}", .path.display())]
    Capacity {
        path: PathBuf,
        line: usize,
        address: u64,
    },
    #[error("no data to write")]
    NoData,
    #[error("unknown header type {0}")]
    UnknownHeaderType(u32),
    #[error("write error '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

impl AssembleError {
    /// Process exit code for the failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            AssembleError::UnknownHeaderType(_) => 1,
            AssembleError::Open { .. } | AssembleError::Read { .. } => 2,
            AssembleError::Record {
                source: RecordError::Checksum,
                ..
            } => 4,
            AssembleError::UnexpectedEof { .. }
            | AssembleError::Record { .. }
            | AssembleError::Capacity { .. } => 3,
            AssembleError::NoData => 5,
            AssembleError::Write { .. } => 6,
        }
    }
}
