// Licensed under the Apache-2.0 license

//! Hooks the update flow needs from the board.

/// Hardware watchdog. Configuring it is the platform's business; the update
/// flow feeds it once per processed chunk so a long update does not trigger a
/// reset mid-write.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Board services used after the update decision has been made.
pub trait BootPlatform: Watchdog {
    /// Toggles the status LED.
    fn toggle_led(&mut self);

    fn delay_ms(&mut self, ms: u32);

    /// Hands control to the firmware whose vector table is at `start_address`.
    fn start_firmware(&mut self, start_address: u32) -> !;

    /// Requests a system reset.
    fn reset(&mut self) -> !;
}

/// Watchdog for platforms that run without one.
#[derive(Debug, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}
