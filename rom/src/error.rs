// Licensed under the Apache-2.0 license

use crate::flash::FlashDrvError;
use crate::storage::StorageError;
use thiserror::Error;

/// Why a candidate image could not be used, or why installing it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("candidate header malformed ({read} bytes read)")]
    MalformedHeader { read: usize },
    #[error("candidate payload truncated: expected {expected} bytes, read {read}")]
    ShortRead { expected: u32, read: u32 },
    #[error("candidate crc mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    CrcMismatch { declared: u32, computed: u32 },
    #[error("candidate does not fit program memory")]
    OutOfRange,
    #[error("flash error: {0}")]
    Flash(#[from] FlashDrvError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl UpdateError {
    /// Status code of a corrupt candidate, without the fallback offset.
    pub(crate) fn candidate_code(&self) -> i32 {
        match self {
            UpdateError::MalformedHeader { .. } => -1,
            UpdateError::ShortRead { .. } | UpdateError::Storage(_) => -2,
            UpdateError::CrcMismatch { .. } | UpdateError::OutOfRange => -3,
            UpdateError::Flash(_) => -4,
        }
    }
}

/// Fatal conditions. The only remaining action for each is a platform reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("no valid firmware installed and no candidate image")]
    NoFirmware,
    #[error("no valid firmware installed and candidate unusable: {0}")]
    CandidateCorrupt(UpdateError),
    #[error("programming failed: {0}")]
    ProgrammingFailed(UpdateError),
    #[error("installed image does not verify after programming")]
    VerifyFailed,
}

impl FatalError {
    /// Status code reported for the fatal condition.
    pub fn code(&self) -> i32 {
        match self {
            FatalError::NoFirmware => -206,
            FatalError::CandidateCorrupt(e) => e.candidate_code(),
            FatalError::ProgrammingFailed(_) => -4,
            FatalError::VerifyFailed => -5,
        }
    }
}
