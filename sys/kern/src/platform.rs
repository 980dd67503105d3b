// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the kernel and the board.
//!
//! Everything the kernel needs from the outside world -- a clock, a place to
//! print diagnostics, storage, and the buses -- arrives through one
//! [`Platform`] value, with the hardware-specific pieces named by associated
//! types. Hardware implementations never check permissions; the kernel's
//! gates have already done so by the time a call lands here.

use drv_ddi_api::{GpioPins, I2cBus, SpiBus};
use drv_sd_api::Filesystem;

pub trait Platform {
    type Fs: Filesystem;
    type Gpio: GpioPins;
    type I2c: I2cBus;
    type Spi: SpiBus;

    /// Monotonic milliseconds since an arbitrary origin. Wraps after about
    /// 49 days; the kernel only ever does wrap-safe arithmetic on it.
    fn now_ms(&self) -> u32;

    /// Emits one line of diagnostic text.
    fn console_line(&mut self, line: core::fmt::Arguments<'_>);

    /// The mounted storage volume, or `None` if the medium is absent or
    /// failed to mount. The kernel re-asks on every file operation, so a
    /// card yanked at runtime degrades to I/O errors rather than chaos.
    fn filesystem(&mut self) -> Option<&mut Self::Fs>;

    fn gpio(&mut self) -> &mut Self::Gpio;

    fn i2c(&mut self) -> &mut Self::I2c;

    fn spi(&mut self) -> &mut Self::Spi;

    /// Stops the machine. Only the kernel panic path calls this.
    fn halt(&mut self) -> !;
}
