// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device driver interface: bus capability traits.
//!
//! Each bus gets one small trait, and the board provides one implementation
//! per bus. The kernel's driver gates check the caller's permission bit and
//! forward here; implementations of these traits may therefore assume the
//! caller is authorized.

#![no_std]

/// Error from a bus transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    /// The addressed device did not acknowledge.
    Nack,
    /// Some other bus-level failure (arbitration loss, electrical fault).
    Bus,
}

/// Digital pin configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum PinMode {
    Input = 0,
    Output = 1,
    InputPullup = 2,
}

impl core::convert::TryFrom<u32> for PinMode {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Input),
            1 => Ok(Self::Output),
            2 => Ok(Self::InputPullup),
            _ => Err(()),
        }
    }
}

/// Digital and analog pin access.
pub trait GpioPins {
    fn pin_mode(&mut self, pin: u8, mode: PinMode);
    fn digital_write(&mut self, pin: u8, high: bool);
    fn digital_read(&mut self, pin: u8) -> bool;
    fn analog_read(&mut self, pin: u8) -> u16;
    fn analog_write(&mut self, pin: u8, value: u16);
}

/// Two-wire bus access.
pub trait I2cBus {
    /// Joins the bus, as a controller when `address` is `None`, otherwise as
    /// a peripheral at the given address.
    fn begin(&mut self, address: Option<u8>);

    /// Writes `data` to the device at `address`. Returns the number of bytes
    /// accepted.
    fn write(&mut self, address: u8, data: &[u8]) -> Result<usize, BusError>;

    /// Reads up to `buf.len()` bytes from the device at `address`. Returns
    /// the number of bytes received.
    fn read(
        &mut self,
        address: u8,
        buf: &mut [u8],
    ) -> Result<usize, BusError>;

    /// Asks the device at `address` to prepare `quantity` bytes; returns how
    /// many it will actually supply.
    fn request(&mut self, address: u8, quantity: usize) -> usize;
}

/// Serial peripheral bus access, one byte at a time.
pub trait SpiBus {
    fn begin(&mut self);

    /// Clocks `byte` out and returns the byte clocked in.
    fn transfer_byte(&mut self, byte: u8) -> u8;

    fn end(&mut self);
}
