/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Firmware update flow of the boot ROM: validate the installed firmware,
    check a candidate image on external storage and program it.

--*/

#![cfg_attr(not(test), no_std)]

pub mod boot_flow;
pub use boot_flow::{finish, BootAction, UpdateFlow};
pub mod decider;
pub use decider::{KeepReason, UpdateDecider, UpdateOutcome, UpdateState};
mod error;
pub use error::{FatalError, UpdateError};
pub mod flash;
pub use flash::*;
pub mod installed;
pub use installed::{read_installed_record, InstalledImage};
mod platform;
pub use platform::{BootPlatform, NoWatchdog, Watchdog};
pub mod programmer;
pub use programmer::FlashProgrammer;
pub mod storage;
pub use storage::{FileStorage, OpenFlags, StorageError, StoredFile};

#[cfg(test)]
mod test_util;
