// Licensed under the Apache-2.0 license

pub mod assembler;
mod error;
pub mod flash_image;
pub mod hex_record;
pub mod raw_image;
pub mod sim;

pub use assembler::{AssembledImage, AssemblerConfig, AssemblyStats, FileStats, HexAssembler};
pub use error::{AssembleError, RecordError};
pub use flash_image::{image_create, HeaderSpec, ImageCreateArgs};
pub use raw_image::{CapacityExceeded, RawImage};
pub use sim::{simulate, DirStorage, FileFlash, SimulateArgs};
