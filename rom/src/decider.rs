// Licensed under the Apache-2.0 license

//! Boot-time decision between keeping the installed firmware and installing
//! the candidate image found on external storage.

use crate::error::{FatalError, UpdateError};
use crate::flash::FlashStorage;
use crate::installed::InstalledImage;
use crate::platform::Watchdog;
use crate::programmer::FlashProgrammer;
use crate::storage::{read_full, FileStorage, OpenFlags, StorageError, StoredFile};
use boot_config::{UpdateConfig, UpdateConfigError, CHUNK_BUFFER_SIZE};
use flash_image::{CrcTracker, ImageHeader, IMAGE_HEADER_SIZE};
use log::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    NoInstalled,
    InstalledValid,
    NoCandidate,
    CandidateIdentical,
    CandidateCorrupt,
    Flashing,
    VerifiedOk,
    VerifyFailed,
    Halt,
}

/// Why the installed firmware is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    NoCandidate,
    CandidateIdentical,
    CandidateCorrupt(UpdateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The installed firmware is valid and stays as it is.
    BootInstalled {
        header: ImageHeader,
        reason: KeepReason,
    },
    /// The candidate was flashed and verified.
    Updated { header: ImageHeader },
    Halt(FatalError),
}

impl UpdateOutcome {
    /// Numeric status: `0` keep installed, `1` updated, `-101..=-103` corrupt
    /// candidate with fallback, negative fatal codes otherwise.
    pub fn status_code(&self) -> i32 {
        match self {
            UpdateOutcome::BootInstalled {
                reason: KeepReason::CandidateCorrupt(e),
                ..
            } => e.candidate_code() - 100,
            UpdateOutcome::BootInstalled { .. } => 0,
            UpdateOutcome::Updated { .. } => 1,
            UpdateOutcome::Halt(e) => e.code(),
        }
    }

    /// Header of the firmware to start, if any.
    pub fn boot_header(&self) -> Option<&ImageHeader> {
        match self {
            UpdateOutcome::BootInstalled { header, .. } | UpdateOutcome::Updated { header } => {
                Some(header)
            }
            UpdateOutcome::Halt(_) => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            UpdateOutcome::BootInstalled {
                reason: KeepReason::CandidateCorrupt(_),
                ..
            }
        )
    }
}

pub struct UpdateDecider<'a, F: FlashStorage + ?Sized, S: FileStorage> {
    flash: &'a mut F,
    storage: &'a mut S,
    config: UpdateConfig,
    state: UpdateState,
}

impl<'a, F: FlashStorage + ?Sized, S: FileStorage> UpdateDecider<'a, F, S> {
    pub fn new(
        flash: &'a mut F,
        storage: &'a mut S,
        config: UpdateConfig,
    ) -> Result<Self, UpdateConfigError> {
        config.validate()?;
        Ok(Self {
            flash,
            storage,
            config,
            state: UpdateState::NoInstalled,
        })
    }

    /// Last state the decider entered.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    fn enter(&mut self, state: UpdateState) {
        debug!("Update state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn record_address(&self) -> usize {
        self.config.installed_record_address as usize
    }

    /// Runs the whole decision procedure once. Flashing, when it happens,
    /// cannot be cancelled; the watchdog is fed once per processed chunk.
    pub fn run(&mut self, watchdog: &mut dyn Watchdog) -> UpdateOutcome {
        let mut chunk_buffer = [0u8; CHUNK_BUFFER_SIZE];
        let buffer = &mut chunk_buffer[..self.config.page_size];
        let record = self.record_address();

        let installed = InstalledImage::check(&*self.flash, record, buffer, watchdog);
        let fallback = match installed.header {
            Some(header) if installed.valid => {
                self.enter(UpdateState::InstalledValid);
                info!(
                    "Installed firmware valid: {} bytes at {:#x}, timestamp {}",
                    header.binary_size(),
                    header.load_address(),
                    header.timestamp()
                );
                Some(header)
            }
            _ => {
                self.enter(UpdateState::NoInstalled);
                info!("No valid installed firmware");
                None
            }
        };

        let flags = OpenFlags::READ | OpenFlags::CRC;
        let mut file = match self.storage.open(self.config.candidate_name, flags) {
            Ok(file) => file,
            Err(StorageError::NotFound) => {
                self.enter(UpdateState::NoCandidate);
                return match fallback {
                    Some(header) => {
                        info!("No candidate image, booting installed firmware");
                        UpdateOutcome::BootInstalled {
                            header,
                            reason: KeepReason::NoCandidate,
                        }
                    }
                    None => self.halt(FatalError::NoFirmware),
                };
            }
            Err(e) => return self.reject(e.into(), fallback),
        };

        let candidate = match Self::read_candidate_header(&mut file) {
            Ok(header) => header,
            Err(e) => {
                file.close();
                return self.reject(e, fallback);
            }
        };
        info!(
            "Candidate image: {} bytes at {:#x}, timestamp {}, crc {:#010x}",
            candidate.binary_size(),
            candidate.load_address(),
            candidate.timestamp(),
            candidate.crc32()
        );

        if let Some(header) = fallback {
            if header.timestamp() == candidate.timestamp() && header.crc32() == candidate.crc32() {
                self.enter(UpdateState::CandidateIdentical);
                info!("Candidate already installed");
                file.close();
                return UpdateOutcome::BootInstalled {
                    header,
                    reason: KeepReason::CandidateIdentical,
                };
            }
        }

        let fits = FlashProgrammer::new(&mut *self.flash, record).check_fits(&candidate);
        let checked = match fits {
            Ok(()) => Self::check_payload(&candidate, &mut file, buffer, watchdog),
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            file.close();
            return self.reject(e, fallback);
        }

        self.enter(UpdateState::Flashing);
        let mut programmer = FlashProgrammer::new(&mut *self.flash, record);
        let programmed = programmer.program(&candidate, &mut file, watchdog);
        file.close();
        if let Err(e) = programmed {
            error!("Programming failed: {}", e);
            return self.halt(FatalError::ProgrammingFailed(e));
        }

        let installed = InstalledImage::check(&*self.flash, record, buffer, watchdog);
        if installed.valid && installed.header == Some(candidate) {
            self.enter(UpdateState::VerifiedOk);
            info!("Firmware updated and verified");
            UpdateOutcome::Updated { header: candidate }
        } else {
            self.enter(UpdateState::VerifyFailed);
            error!("Installed firmware does not verify after programming");
            self.halt(FatalError::VerifyFailed)
        }
    }

    /// Reads the header and restarts the file's running CRC so that it only
    /// covers the payload.
    fn read_candidate_header(file: &mut S::File) -> Result<ImageHeader, UpdateError> {
        let mut raw = [0u8; IMAGE_HEADER_SIZE];
        let read = read_full(file, &mut raw)?;
        if read != IMAGE_HEADER_SIZE {
            return Err(UpdateError::MalformedHeader { read });
        }
        let header =
            ImageHeader::decode_trusted(&raw).ok_or(UpdateError::MalformedHeader { read })?;
        file.reset_crc();
        Ok(header)
    }

    /// Streams exactly `binary_size` payload bytes through a fresh tracker.
    /// The file's own running CRC must agree with it, otherwise the data was
    /// not read back as stored.
    fn check_payload(
        header: &ImageHeader,
        file: &mut S::File,
        buffer: &mut [u8],
        watchdog: &mut dyn Watchdog,
    ) -> Result<(), UpdateError> {
        let total = header.binary_size() as usize;
        let mut tracker = CrcTracker::new();
        let mut offset = 0;
        while offset < total {
            let n = core::cmp::min(buffer.len(), total - offset);
            let got = read_full(file, &mut buffer[..n])?;
            tracker.update(&buffer[..got]);
            watchdog.feed();
            if got != n {
                return Err(UpdateError::ShortRead {
                    expected: header.binary_size(),
                    read: (offset + got) as u32,
                });
            }
            offset += n;
        }
        if file.crc32() != tracker.value() {
            warn!(
                "Storage CRC {:#010x} disagrees with read data {:#010x}",
                file.crc32(),
                tracker.value()
            );
            return Err(UpdateError::Storage(StorageError::Io));
        }
        if tracker.value() != header.crc32() {
            return Err(UpdateError::CrcMismatch {
                declared: header.crc32(),
                computed: tracker.value(),
            });
        }
        Ok(())
    }

    fn reject(&mut self, e: UpdateError, fallback: Option<ImageHeader>) -> UpdateOutcome {
        self.enter(UpdateState::CandidateCorrupt);
        match fallback {
            Some(header) => {
                warn!("Candidate rejected ({}), booting installed firmware", e);
                UpdateOutcome::BootInstalled {
                    header,
                    reason: KeepReason::CandidateCorrupt(e),
                }
            }
            None => self.halt(FatalError::CandidateCorrupt(e)),
        }
    }

    fn halt(&mut self, e: FatalError) -> UpdateOutcome {
        self.enter(UpdateState::Halt);
        error!("Update halted: {} (status {})", e, e.code());
        UpdateOutcome::Halt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installed::read_installed_record;
    use crate::platform::NoWatchdog;
    use crate::test_util::{image_file, CountingWatchdog, MemFlash, MemStorage};
    use zerocopy::byteorder::little_endian::U32;
    use zerocopy::IntoBytes;

    const RECORD: u32 = 0x7F00;
    const CONFIG: UpdateConfig = UpdateConfig {
        installed_record_address: RECORD,
        page_size: 0x100,
        candidate_name: "_firmware.bin",
        fallback_blinks: 5,
        fatal_wait_seconds: 60,
    };

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    fn header_for(data: &[u8], load: u32, timestamp: u32) -> ImageHeader {
        let crc = flash_image::crc32(data);
        ImageHeader::new(data.len() as u32, load, crc, timestamp, load)
    }

    fn installed_flash(data: &[u8], header: &ImageHeader) -> MemFlash {
        let mut flash = MemFlash::new(0x8000, 0x100);
        flash.load(header.load_address() as usize, data);
        flash.load(RECORD as usize, header.as_bytes());
        flash
    }

    fn run(flash: &mut MemFlash, storage: &mut MemStorage) -> (UpdateOutcome, UpdateState) {
        let mut decider = UpdateDecider::new(flash, storage, CONFIG).unwrap();
        let outcome = decider.run(&mut NoWatchdog);
        (outcome, decider.state())
    }

    #[test]
    fn test_nothing_anywhere_halts() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let mut storage = MemStorage::default();
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(outcome, UpdateOutcome::Halt(FatalError::NoFirmware));
        assert_eq!(outcome.status_code(), -206);
        assert_eq!(state, UpdateState::Halt);
    }

    #[test]
    fn test_no_candidate_boots_installed() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let mut storage = MemStorage::default();
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::BootInstalled {
                header,
                reason: KeepReason::NoCandidate
            }
        );
        assert_eq!(outcome.status_code(), 0);
        assert_eq!(state, UpdateState::NoCandidate);
        let flags = OpenFlags::READ | OpenFlags::CRC;
        assert_eq!(storage.opened, vec![("_firmware.bin".to_string(), flags)]);
    }

    #[test]
    fn test_identical_candidate_is_not_flashed() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&header, &data));
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::BootInstalled {
                header,
                reason: KeepReason::CandidateIdentical
            }
        );
        assert_eq!(state, UpdateState::CandidateIdentical);
        assert_eq!(flash.erase_count(), 0);
        assert_eq!(flash.write_count(), 0);
    }

    #[test]
    fn test_identity_requires_valid_installed_image() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        // Damage the installed payload so the record no longer verifies.
        flash.load(0x1010, &[!data[0x10]]);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&header, &data));
        let (outcome, _) = run(&mut flash, &mut storage);
        assert_eq!(outcome, UpdateOutcome::Updated { header });
        assert_eq!(outcome.status_code(), 1);
        assert_eq!(flash.bytes(0x1000, data.len()), &data[..]);
    }

    #[test]
    fn test_fresh_install() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let data = payload(0x4F3, 9);
        let header = header_for(&data, 0x2000, 200);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&header, &data));

        let mut watchdog = CountingWatchdog::default();
        let mut decider = UpdateDecider::new(&mut flash, &mut storage, CONFIG).unwrap();
        let outcome = decider.run(&mut watchdog);
        assert_eq!(decider.state(), UpdateState::VerifiedOk);
        assert_eq!(outcome, UpdateOutcome::Updated { header });
        // Five chunks each for the integrity pass, programming and the
        // post-programming verify, plus one for the record.
        assert_eq!(watchdog.0, 16);
        assert_eq!(flash.bytes(0x2000, data.len()), &data[..]);
        assert_eq!(read_installed_record(&flash, RECORD as usize), Ok(Some(header)));
    }

    #[test]
    fn test_update_replaces_installed() {
        let old = payload(0x180, 1);
        let old_header = header_for(&old, 0x1000, 100);
        let mut flash = installed_flash(&old, &old_header);
        let new = payload(0x100, 2);
        let new_header = header_for(&new, 0x1000, 101);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&new_header, &new));
        let (outcome, _) = run(&mut flash, &mut storage);
        assert_eq!(outcome, UpdateOutcome::Updated { header: new_header });
        assert_eq!(flash.bytes(0x1000, new.len()), &new[..]);
    }

    #[test]
    fn test_corrupt_candidate_falls_back() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let new = payload(0x180, 2);
        let mut bad = header_for(&new, 0x1000, 101);
        bad.crc32 = (bad.crc32() ^ 1).into();
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&bad, &new));
        let (outcome, state) = run(&mut flash, &mut storage);
        assert!(outcome.is_fallback());
        assert_eq!(outcome.status_code(), -103);
        assert_eq!(outcome.boot_header(), Some(&header));
        assert_eq!(state, UpdateState::CandidateCorrupt);
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn test_short_candidate_with_fallback() {
        let data = payload(90, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let declared = ImageHeader::new(100, 0x1000, 0, 101, 0x1000);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&declared, &data));
        let (outcome, _) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::BootInstalled {
                header,
                reason: KeepReason::CandidateCorrupt(UpdateError::ShortRead {
                    expected: 100,
                    read: 90
                })
            }
        );
        assert_eq!(outcome.status_code(), -102);
    }

    #[test]
    fn test_short_candidate_without_fallback_halts() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let data = payload(90, 1);
        let declared = ImageHeader::new(100, 0x1000, 0, 101, 0x1000);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&declared, &data));
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(outcome.status_code(), -2);
        assert_eq!(state, UpdateState::Halt);
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn test_malformed_header() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", vec![0x4F, 0x9C, 0x9B]);
        let (outcome, _) = run(&mut flash, &mut storage);
        let err = UpdateError::MalformedHeader { read: 3 };
        assert_eq!(outcome, UpdateOutcome::Halt(FatalError::CandidateCorrupt(err)));
        assert_eq!(outcome.status_code(), -1);

        let data = payload(0x40, 3);
        let mut header = header_for(&data, 0x1000, 1);
        header.magic = U32::new(0x1234_5678);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&header, &data));
        let (outcome, _) = run(&mut flash, &mut storage);
        assert_eq!(outcome.status_code(), -1);
    }

    #[test]
    fn test_storage_read_error_is_recoverable() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let new = payload(0x180, 2);
        let mut storage = MemStorage::default();
        let file = image_file(&header_for(&new, 0x1000, 101), &new);
        storage.insert("_firmware.bin", file);
        storage.fail_reads_at(0x100);
        let (outcome, _) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::BootInstalled {
                header,
                reason: KeepReason::CandidateCorrupt(UpdateError::Storage(StorageError::Io))
            }
        );
        assert_eq!(outcome.status_code(), -102);
    }

    #[test]
    fn test_storage_crc_disagreement_is_read_error() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let new = payload(0x180, 2);
        let mut storage = MemStorage::default();
        let file = image_file(&header_for(&new, 0x1000, 101), &new);
        storage.insert("_firmware.bin", file);
        storage.corrupt_crc();
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::BootInstalled {
                header,
                reason: KeepReason::CandidateCorrupt(UpdateError::Storage(StorageError::Io))
            }
        );
        assert_eq!(outcome.status_code(), -102);
        assert_eq!(state, UpdateState::CandidateCorrupt);
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn test_open_failure_with_fallback() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let mut storage = MemStorage::default();
        storage.fail_open(StorageError::Io);
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::BootInstalled {
                header,
                reason: KeepReason::CandidateCorrupt(UpdateError::Storage(StorageError::Io))
            }
        );
        assert_eq!(outcome.status_code(), -102);
        assert_eq!(state, UpdateState::CandidateCorrupt);
    }

    #[test]
    fn test_open_failure_without_fallback_halts() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let mut storage = MemStorage::default();
        storage.fail_open(StorageError::Io);
        let (outcome, state) = run(&mut flash, &mut storage);
        let err = UpdateError::Storage(StorageError::Io);
        assert_eq!(outcome, UpdateOutcome::Halt(FatalError::CandidateCorrupt(err)));
        assert_eq!(outcome.status_code(), -2);
        assert_eq!(state, UpdateState::Halt);
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn test_candidate_overlapping_record_is_rejected() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let data = payload(0x100, 4);
        let header = header_for(&data, 0x7E80, 5);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&header, &data));
        let (outcome, _) = run(&mut flash, &mut storage);
        assert_eq!(
            outcome,
            UpdateOutcome::Halt(FatalError::CandidateCorrupt(UpdateError::OutOfRange))
        );
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn test_write_corruption_is_verify_failure() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        let new = payload(0x180, 2);
        let new_header = header_for(&new, 0x1000, 101);
        flash.corrupt_writes_at(0x1105);
        let mut storage = MemStorage::default();
        storage.insert("_firmware.bin", image_file(&new_header, &new));
        let (outcome, state) = run(&mut flash, &mut storage);
        assert_eq!(outcome, UpdateOutcome::Halt(FatalError::VerifyFailed));
        assert_eq!(outcome.status_code(), -5);
        assert_eq!(state, UpdateState::Halt);
        assert_eq!(outcome.boot_header(), None);
    }

    #[test]
    fn test_erase_failure_is_fatal() {
        let data = payload(0x180, 1);
        let header = header_for(&data, 0x1000, 100);
        let mut flash = installed_flash(&data, &header);
        flash.fail_erase_at(0x1000);
        let new = payload(0x180, 2);
        let mut storage = MemStorage::default();
        let file = image_file(&header_for(&new, 0x1000, 101), &new);
        storage.insert("_firmware.bin", file);
        let (outcome, _) = run(&mut flash, &mut storage);
        let err = UpdateError::Flash(crate::flash::FlashDrvError::ERASE);
        assert_eq!(outcome, UpdateOutcome::Halt(FatalError::ProgrammingFailed(err)));
        assert_eq!(outcome.status_code(), -4);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut flash = MemFlash::new(0x8000, 0x100);
        let mut storage = MemStorage::default();
        let config = UpdateConfig {
            page_size: 0x102,
            ..CONFIG
        };
        assert!(matches!(
            UpdateDecider::new(&mut flash, &mut storage, config),
            Err(UpdateConfigError::PageSizeNotWordMultiple)
        ));
    }
}
