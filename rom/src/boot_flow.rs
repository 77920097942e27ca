// Licensed under the Apache-2.0 license

//! Boot sequence around the update decision: signal the result on the status
//! LED and hand off to firmware or reset.

use crate::decider::{UpdateDecider, UpdateOutcome};
use crate::flash::FlashStorage;
use crate::platform::BootPlatform;
use crate::storage::FileStorage;
use boot_config::UpdateConfig;
use log::{error, info, warn};

/// What the boot ROM does once the update flow has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    StartFirmware { start_address: u32 },
    Reset,
}

pub struct UpdateFlow {
    config: UpdateConfig,
}

impl UpdateFlow {
    pub fn new(config: UpdateConfig) -> Self {
        Self { config }
    }

    /// Runs the update decision and the LED signalling that follows it.
    ///
    /// A rejected candidate with a valid installed image blinks the LED
    /// `fallback_blinks` times before the installed firmware is started. A
    /// fatal outcome toggles the LED once per second for `fatal_wait_seconds`
    /// and then asks for a reset. Returns the outcome, or `None` if the
    /// configuration itself was rejected, together with the final action.
    pub fn run<P, F, S>(
        &self,
        platform: &mut P,
        flash: &mut F,
        storage: &mut S,
    ) -> (Option<UpdateOutcome>, BootAction)
    where
        P: BootPlatform,
        F: FlashStorage + ?Sized,
        S: FileStorage,
    {
        let outcome = match UpdateDecider::new(flash, storage, self.config) {
            Ok(mut decider) => decider.run(platform),
            Err(e) => {
                error!("Invalid update configuration: {}", e);
                self.fatal_wait(platform, 0);
                return (None, BootAction::Reset);
            }
        };

        let action = match outcome.boot_header() {
            Some(header) => {
                if outcome.is_fallback() {
                    warn!("Firmware not changed (status {})", outcome.status_code());
                    self.fallback_blink(platform);
                }
                info!("Start firmware at {:#x}", header.start_address());
                BootAction::StartFirmware {
                    start_address: header.start_address(),
                }
            }
            None => {
                self.fatal_wait(platform, outcome.status_code());
                BootAction::Reset
            }
        };
        (Some(outcome), action)
    }

    /// Runs the flow and performs the resulting action.
    pub fn boot<P, F, S>(&self, platform: &mut P, flash: &mut F, storage: &mut S) -> !
    where
        P: BootPlatform,
        F: FlashStorage + ?Sized,
        S: FileStorage,
    {
        let (_, action) = self.run(platform, flash, storage);
        finish(platform, action)
    }

    fn fallback_blink<P: BootPlatform>(&self, platform: &mut P) {
        for remaining in (0..self.config.fallback_blinks).rev() {
            info!("Restart old firmware ({})", remaining);
            for delay in [100, 100, 800] {
                platform.toggle_led();
                platform.delay_ms(delay);
            }
            platform.feed();
        }
    }

    fn fatal_wait<P: BootPlatform>(&self, platform: &mut P, status: i32) {
        for remaining in (0..self.config.fatal_wait_seconds).rev() {
            platform.toggle_led();
            error!("Error {}, waiting for reboot ({})", status, remaining);
            platform.delay_ms(1000);
            platform.feed();
        }
    }
}

pub fn finish<P: BootPlatform>(platform: &mut P, action: BootAction) -> ! {
    match action {
        BootAction::StartFirmware { start_address } => platform.start_firmware(start_address),
        BootAction::Reset => platform.reset(),
    }
}
