// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device-driver gates.
//!
//! Every bus call has the same shape: check the caller's permission bit,
//! then forward to the board's implementation of the bus trait. These gates
//! are the *only* place bus permissions are checked -- the hardware side
//! may assume an authorized caller.

use abi::{Permissions, SysError};
use drv_ddi_api::{GpioPins, I2cBus, PinMode, SpiBus};

use crate::kernel::Kernel;
use crate::platform::Platform;

impl<'h, P: Platform> Kernel<'h, P> {
    // --- GPIO -------------------------------------------------------------

    pub fn gpio_pin_mode(
        &mut self,
        pin: u8,
        mode: PinMode,
    ) -> Result<(), SysError> {
        self.require(Permissions::GPIO)?;
        self.platform.gpio().pin_mode(pin, mode);
        Ok(())
    }

    pub fn gpio_digital_write(
        &mut self,
        pin: u8,
        high: bool,
    ) -> Result<(), SysError> {
        self.require(Permissions::GPIO)?;
        self.platform.gpio().digital_write(pin, high);
        Ok(())
    }

    pub fn gpio_digital_read(&mut self, pin: u8) -> Result<bool, SysError> {
        self.require(Permissions::GPIO)?;
        Ok(self.platform.gpio().digital_read(pin))
    }

    pub fn gpio_analog_read(&mut self, pin: u8) -> Result<u16, SysError> {
        self.require(Permissions::GPIO)?;
        Ok(self.platform.gpio().analog_read(pin))
    }

    pub fn gpio_analog_write(
        &mut self,
        pin: u8,
        value: u16,
    ) -> Result<(), SysError> {
        self.require(Permissions::GPIO)?;
        self.platform.gpio().analog_write(pin, value);
        Ok(())
    }

    // --- I2C --------------------------------------------------------------

    pub fn i2c_begin(&mut self, address: Option<u8>) -> Result<(), SysError> {
        self.require(Permissions::I2C)?;
        self.platform.i2c().begin(address);
        Ok(())
    }

    /// Writes `data` to the device at `address`, returning the number of
    /// bytes the device accepted. A NACK or bus fault is an I/O error.
    pub fn i2c_write(
        &mut self,
        address: u8,
        data: &[u8],
    ) -> Result<usize, SysError> {
        self.require(Permissions::I2C)?;
        if data.is_empty() {
            return Err(SysError::InvalidParam);
        }
        self.platform
            .i2c()
            .write(address, data)
            .map_err(|_| SysError::IoError)
    }

    pub fn i2c_read(
        &mut self,
        address: u8,
        buf: &mut [u8],
    ) -> Result<usize, SysError> {
        self.require(Permissions::I2C)?;
        if buf.is_empty() {
            return Err(SysError::InvalidParam);
        }
        self.platform
            .i2c()
            .read(address, buf)
            .map_err(|_| SysError::IoError)
    }

    pub fn i2c_request(
        &mut self,
        address: u8,
        quantity: usize,
    ) -> Result<usize, SysError> {
        self.require(Permissions::I2C)?;
        Ok(self.platform.i2c().request(address, quantity))
    }

    // --- SPI --------------------------------------------------------------

    pub fn spi_begin(&mut self) -> Result<(), SysError> {
        self.require(Permissions::SPI)?;
        self.platform.spi().begin();
        Ok(())
    }

    /// Full-duplex transfer, one byte at a time. Either side may be absent:
    /// send-only transfers discard the returned bytes, receive-only
    /// transfers clock out zeros. With both present, the transfer length is
    /// the shorter of the two buffers.
    pub fn spi_transfer(
        &mut self,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
    ) -> Result<usize, SysError> {
        self.require(Permissions::SPI)?;
        let spi = self.platform.spi();
        match (tx, rx) {
            (Some(tx), Some(rx)) => {
                let n = tx.len().min(rx.len());
                if n == 0 {
                    return Err(SysError::InvalidParam);
                }
                for (out, in_) in tx.iter().zip(rx.iter_mut()) {
                    *in_ = spi.transfer_byte(*out);
                }
                Ok(n)
            }
            (Some(tx), None) => {
                if tx.is_empty() {
                    return Err(SysError::InvalidParam);
                }
                for &b in tx {
                    spi.transfer_byte(b);
                }
                Ok(tx.len())
            }
            (None, Some(rx)) => {
                if rx.is_empty() {
                    return Err(SysError::InvalidParam);
                }
                for b in rx.iter_mut() {
                    *b = spi.transfer_byte(0);
                }
                Ok(rx.len())
            }
            (None, None) => Err(SysError::InvalidParam),
        }
    }

    pub fn spi_end(&mut self) -> Result<(), SysError> {
        self.require(Permissions::SPI)?;
        self.platform.spi().end();
        Ok(())
    }
}
