// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fake hardware for running the kernel on a development host.
//!
//! Supplies every leaf the kernel's platform seam wants: a
//! manually-advanced clock, a RAM-backed filesystem, a GPIO that records
//! what was done to it, a scriptable I2C device, a loopback SPI, and a
//! console that captures lines for inspection. Each part implements the
//! corresponding `drv-*-api` trait; the consumer assembles them into a
//! platform (the kernel's tests wire them to the fake clock, the demo to
//! real time and stdout). Tests drive the clock and read the recordings.

mod ramdisk;

pub use ramdisk::{RamDisk, RamNode};

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};

use drv_ddi_api::{BusError, GpioPins, I2cBus, PinMode, SpiBus};

/// A clock that only moves when told to -- plus an optional per-query
/// auto-step so code that spins on the clock (semaphore waits) makes
/// progress in a single-threaded test.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Cell<u32>,
    auto_step: Cell<u32>,
}

impl FakeClock {
    pub fn now_ms(&self) -> u32 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.auto_step.get()));
        t
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    /// Every subsequent `now_ms` query advances the clock by `ms` after
    /// reading it. Zero (the default) freezes time between `advance`s.
    pub fn set_auto_step(&self, ms: u32) {
        self.auto_step.set(ms);
    }
}

/// Captures console output, one line per entry.
#[derive(Debug, Default)]
pub struct FakeConsole {
    pub lines: Vec<String>,
}

impl FakeConsole {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

/// Everything ever asked of the GPIO, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpioOp {
    Mode(u8, PinMode),
    DigitalWrite(u8, bool),
    AnalogWrite(u8, u16),
}

#[derive(Debug, Default)]
pub struct FakeGpio {
    pub ops: Vec<GpioOp>,
    pub digital: HashMap<u8, bool>,
    pub analog: HashMap<u8, u16>,
}

impl GpioPins for FakeGpio {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.ops.push(GpioOp::Mode(pin, mode));
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.ops.push(GpioOp::DigitalWrite(pin, high));
        self.digital.insert(pin, high);
    }

    fn digital_read(&mut self, pin: u8) -> bool {
        self.digital.get(&pin).copied().unwrap_or(false)
    }

    fn analog_read(&mut self, pin: u8) -> u16 {
        self.analog.get(&pin).copied().unwrap_or(0)
    }

    fn analog_write(&mut self, pin: u8, value: u16) {
        self.ops.push(GpioOp::AnalogWrite(pin, value));
        self.analog.insert(pin, value);
    }
}

/// Records writes; serves reads from a queue of scripted responses. Set
/// `nack_next` to make the next transaction fail.
#[derive(Debug, Default)]
pub struct FakeI2c {
    pub joined: Option<Option<u8>>,
    pub writes: Vec<(u8, Vec<u8>)>,
    pub responses: VecDeque<Vec<u8>>,
    pub nack_next: bool,
}

impl I2cBus for FakeI2c {
    fn begin(&mut self, address: Option<u8>) {
        self.joined = Some(address);
    }

    fn write(&mut self, address: u8, data: &[u8]) -> Result<usize, BusError> {
        if std::mem::take(&mut self.nack_next) {
            return Err(BusError::Nack);
        }
        self.writes.push((address, data.to_vec()));
        Ok(data.len())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        if std::mem::take(&mut self.nack_next) {
            return Err(BusError::Nack);
        }
        let _ = address;
        match self.responses.pop_front() {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn request(&mut self, _address: u8, quantity: usize) -> usize {
        self.responses
            .front()
            .map(|r| r.len().min(quantity))
            .unwrap_or(0)
    }
}

/// Loopback SPI: every byte clocked out comes straight back, and is also
/// recorded.
#[derive(Debug, Default)]
pub struct FakeSpi {
    pub begun: u32,
    pub ended: u32,
    pub sent: Vec<u8>,
}

impl SpiBus for FakeSpi {
    fn begin(&mut self) {
        self.begun += 1;
    }

    fn transfer_byte(&mut self, byte: u8) -> u8 {
        self.sent.push(byte);
        byte
    }

    fn end(&mut self) {
        self.ended += 1;
    }
}

/// The assembled board.
pub struct FakeBoard {
    pub clock: FakeClock,
    pub console: FakeConsole,
    pub disk: Option<RamDisk>,
    pub gpio: FakeGpio,
    pub i2c: FakeI2c,
    pub spi: FakeSpi,
}

impl FakeBoard {
    pub fn new() -> Self {
        Self {
            clock: FakeClock::default(),
            console: FakeConsole::default(),
            disk: Some(RamDisk::new()),
            gpio: FakeGpio::default(),
            i2c: FakeI2c::default(),
            spi: FakeSpi::default(),
        }
    }

    /// A board whose card slot is empty; file operations will fail with
    /// I/O errors.
    pub fn without_disk() -> Self {
        Self {
            disk: None,
            ..Self::new()
        }
    }
}

impl Default for FakeBoard {
    fn default() -> Self {
        Self::new()
    }
}
