// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The numeric syscall dispatcher.
//!
//! A single entry point takes an operation tag and four opaque words,
//! decodes them per-operation, and routes to the owning component. The
//! result is a signed integer: non-negative for success (a value or a
//! handle), negative for one of the `SysError` kinds. Unknown and reserved
//! tags return `InvalidCall`; nothing here ever rewrites a component's
//! error.
//!
//! Arguments that name task memory do so by *arena handle*. A buffer is
//! passed as a `(handle, length)` pair and resolved through the arena,
//! which is what keeps this surface safe: a forged or stale handle misses
//! cleanly instead of aliasing someone else's bytes. The sentinel
//! `ARG_NONE` stands in for "no buffer" where the operation allows one to
//! be absent.

use abi::{
    MemHandle, Permissions, SysError, Sysnum, MAX_MESSAGE_DATA,
};
use drv_ddi_api::{I2cBus, PinMode, SpiBus};
use drv_sd_api::FsNode;
use zerocopy::IntoBytes;

use crate::kernel::Kernel;
use crate::platform::Platform;

/// Argument sentinel for an absent optional buffer.
pub const ARG_NONE: u32 = u32::MAX;

/// Longest path or message string the dispatcher will copy out of a task
/// buffer.
const STR_MAX: usize = 128;

/// Decodes a raw argument word as a memory handle.
fn mem_handle_arg(raw: u32) -> Result<MemHandle, SysError> {
    u16::try_from(raw)
        .map(MemHandle)
        .map_err(|_| SysError::InvalidParam)
}

impl<'h, P: Platform> Kernel<'h, P> {
    /// Syscall entry point. See the module docs for the argument
    /// conventions; per-operation details live on the typed kernel methods
    /// this routes to.
    pub fn syscall(&mut self, nr: u32, args: [u32; 4]) -> i32 {
        let Ok(num) = Sysnum::try_from(nr) else {
            return SysError::InvalidCall.code();
        };
        match self.dispatch(num, args) {
            Ok(v) => v,
            Err(e) => e.code(),
        }
    }

    fn dispatch(
        &mut self,
        num: Sysnum,
        args: [u32; 4],
    ) -> Result<i32, SysError> {
        match num {
            // --- Files ---------------------------------------------------
            Sysnum::FileOpen => {
                let mut buf = [0; STR_MAX];
                let path = self.str_arg(&mut buf, args[0], args[1])?;
                let write = args[2] != 0;
                self.file_open(path, write).map(|h| h as i32)
            }
            Sysnum::FileClose => {
                self.file_close(args[0] as usize).map(|_| 0)
            }
            Sysnum::FileRead => self.file_read_block(args),
            Sysnum::FileWrite => self.file_write_block(args),
            Sysnum::FileDelete => {
                let mut buf = [0; STR_MAX];
                let path = self.str_arg(&mut buf, args[0], args[1])?;
                self.file_delete(path).map(|_| 0)
            }
            Sysnum::FileExists => {
                let mut buf = [0; STR_MAX];
                let path = self.str_arg(&mut buf, args[0], args[1])?;
                self.file_exists(path).map(i32::from)
            }
            Sysnum::FileSize => {
                self.file_size(args[0] as usize).map(|s| s as i32)
            }

            // --- Directories ---------------------------------------------
            Sysnum::DirOpen => {
                let mut buf = [0; STR_MAX];
                let path = self.str_arg(&mut buf, args[0], args[1])?;
                self.dir_open(path).map(|h| h as i32)
            }
            Sysnum::DirRead => self.dir_read_block(args),
            Sysnum::DirClose => self.dir_close(args[0] as usize).map(|_| 0),
            Sysnum::DirCreate => {
                let mut buf = [0; STR_MAX];
                let path = self.str_arg(&mut buf, args[0], args[1])?;
                self.dir_create(path).map(|_| 0)
            }
            Sysnum::DirRemove => {
                let mut buf = [0; STR_MAX];
                let path = self.str_arg(&mut buf, args[0], args[1])?;
                self.dir_remove(path).map(|_| 0)
            }
            Sysnum::DirRewind => {
                self.dir_rewind(args[0] as usize).map(|_| 0)
            }

            // --- Memory --------------------------------------------------
            Sysnum::MemAlloc => {
                let len = args[0] as usize;
                if len == 0 {
                    return Err(SysError::InvalidParam);
                }
                self.mem_alloc(len).map(|h| i32::from(h.0))
            }
            Sysnum::MemFree => {
                // Bad handles warn rather than fail, the way free has
                // always shrugged at null.
                match mem_handle_arg(args[0]) {
                    Ok(h) => self.mem_free(h),
                    Err(_) => {
                        self.klog(format_args!(
                            "memory: warning: invalid free"
                        ));
                    }
                }
                Ok(0)
            }
            Sysnum::MemInfo => Ok(self.mem_available() as i32),
            Sysnum::MemCompact => {
                self.mem_compact();
                Ok(0)
            }

            // --- Display (reserved) --------------------------------------
            Sysnum::DisplayClear
            | Sysnum::DisplayPixel
            | Sysnum::DisplayText
            | Sysnum::DisplayRect
            | Sysnum::DisplayUpdate => Err(SysError::InvalidCall),

            // --- Tasks ---------------------------------------------------
            // An entry point cannot be named by an argument word, so task
            // creation is not expressible on this surface; the tag stays
            // reserved.
            Sysnum::TaskCreate => Err(SysError::InvalidCall),
            Sysnum::TaskKill => {
                self.require(Permissions::CREATE_TASK)?;
                self.kill_task(args[0] as usize);
                Ok(0)
            }
            Sysnum::TaskYield => {
                self.yield_now();
                Ok(0)
            }
            Sysnum::TaskSleep => {
                self.sleep(args[0]);
                Ok(0)
            }
            Sysnum::TaskList => {
                self.require(Permissions::CREATE_TASK)?;
                self.print_task_list();
                Ok(0)
            }

            // --- IPC -----------------------------------------------------
            Sysnum::IpcSend => self.ipc_send_block(args),
            Sysnum::IpcReceive => self.ipc_receive_block(args),
            Sysnum::IpcPoll => Ok(self.poll() as i32),
            Sysnum::SemCreate => {
                // Names are `'static` strings on the typed surface; a name
                // can't be borrowed out of an arena block, so semaphores
                // made here are anonymous.
                self.sem_create(args[0], args[1], None).map(|id| id as i32)
            }
            Sysnum::SemWait => {
                self.sem_wait(args[0] as usize, args[1]).map(|_| 0)
            }
            Sysnum::SemPost => self.sem_post(args[0] as usize).map(|_| 0),
            Sysnum::SemDestroy => {
                self.sem_destroy(args[0] as usize).map(|_| 0)
            }

            // --- GPIO ----------------------------------------------------
            Sysnum::GpioPinMode => {
                let mode = PinMode::try_from(args[1])
                    .map_err(|_| SysError::InvalidParam)?;
                self.gpio_pin_mode(args[0] as u8, mode).map(|_| 0)
            }
            Sysnum::GpioWrite => self
                .gpio_digital_write(args[0] as u8, args[1] != 0)
                .map(|_| 0),
            Sysnum::GpioRead => {
                self.gpio_digital_read(args[0] as u8).map(i32::from)
            }
            Sysnum::GpioAnalogRead => {
                self.gpio_analog_read(args[0] as u8).map(i32::from)
            }
            Sysnum::GpioAnalogWrite => self
                .gpio_analog_write(args[0] as u8, args[1] as u16)
                .map(|_| 0),

            // --- I2C -----------------------------------------------------
            Sysnum::I2cBegin => {
                let address = if args[0] == 0 {
                    None
                } else {
                    Some(args[0] as u8)
                };
                self.i2c_begin(address).map(|_| 0)
            }
            Sysnum::I2cWrite => self.i2c_write_block(args),
            Sysnum::I2cRead => self.i2c_read_block(args),
            Sysnum::I2cRequest => self
                .i2c_request(args[0] as u8, args[1] as usize)
                .map(|n| n as i32),

            // --- SPI -----------------------------------------------------
            Sysnum::SpiBegin => self.spi_begin().map(|_| 0),
            Sysnum::SpiTransfer => self.spi_transfer_blocks(args),
            Sysnum::SpiEnd => self.spi_end().map(|_| 0),

            // --- System --------------------------------------------------
            Sysnum::GetTime => Ok(self.now().millis() as i32),
            Sysnum::Print => {
                let mut buf = [0; STR_MAX];
                let msg = self.str_arg(&mut buf, args[0], args[1])?;
                self.print(msg);
                Ok(0)
            }
            Sysnum::DbgPrint => {
                let mut buf = [0; STR_MAX];
                let msg = self.str_arg(&mut buf, args[0], args[1])?;
                self.debug(msg);
                Ok(0)
            }
        }
    }

    /// Copies a UTF-8 string argument out of the caller's arena block into
    /// `buf`, so the borrow of the arena ends before the operation runs.
    fn str_arg<'b>(
        &self,
        buf: &'b mut [u8; STR_MAX],
        handle: u32,
        len: u32,
    ) -> Result<&'b str, SysError> {
        let handle = mem_handle_arg(handle)?;
        let len = len as usize;
        let block = self.arena.deref(handle).ok_or(SysError::InvalidParam)?;
        if len > block.len() || len > STR_MAX {
            return Err(SysError::InvalidParam);
        }
        buf[..len].copy_from_slice(&block[..len]);
        core::str::from_utf8(&buf[..len])
            .map_err(|_| SysError::InvalidParam)
    }

    fn file_read_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        let handle = args[0] as usize;
        let block = mem_handle_arg(args[1])?;
        let len = args[2] as usize;
        let caller = self.current_task;

        let slot = self.files.get_mut(handle, caller)?;
        let buf = self
            .arena
            .deref_mut(block)
            .ok_or(SysError::InvalidParam)?;
        if len > buf.len() {
            return Err(SysError::InvalidParam);
        }
        let n = slot
            .resource
            .node
            .read(&mut buf[..len])
            .map_err(|_| SysError::IoError)?;
        Ok(n as i32)
    }

    fn file_write_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        let handle = args[0] as usize;
        let block = mem_handle_arg(args[1])?;
        let len = args[2] as usize;
        let caller = self.current_task;

        let slot = self.files.get_mut(handle, caller)?;
        if !slot.resource.can_write {
            return Err(SysError::Permission);
        }
        let buf = self.arena.deref(block).ok_or(SysError::InvalidParam)?;
        if len > buf.len() {
            return Err(SysError::InvalidParam);
        }
        let n = slot
            .resource
            .node
            .write(&buf[..len])
            .map_err(|_| SysError::IoError)?;
        Ok(n as i32)
    }

    fn dir_read_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        let handle = args[0] as usize;
        let out = mem_handle_arg(args[1])?;
        match self.dir_read(handle)? {
            Some(entry) => {
                let block = self
                    .arena
                    .deref_mut(out)
                    .ok_or(SysError::InvalidParam)?;
                entry
                    .write_to_prefix(block)
                    .map_err(|_| SysError::InvalidParam)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn ipc_send_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        let to = args[0] as usize;
        let len = args[2] as usize;
        if len > MAX_MESSAGE_DATA {
            return Err(SysError::InvalidParam);
        }

        let mut tmp = [0; MAX_MESSAGE_DATA];
        if len > 0 {
            let handle = mem_handle_arg(args[1])?;
            let block =
                self.arena.deref(handle).ok_or(SysError::InvalidParam)?;
            if len > block.len() {
                return Err(SysError::InvalidParam);
            }
            tmp[..len].copy_from_slice(&block[..len]);
        }
        self.send(to, &tmp[..len]).map(|_| 0)
    }

    fn ipc_receive_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        let out = mem_handle_arg(args[0])?;
        let maxlen = args[1] as usize;

        // Validate both destination blocks before consuming the message, so
        // a bogus buffer cannot drop mail on the floor.
        {
            let block =
                self.arena.deref(out).ok_or(SysError::InvalidParam)?;
            if maxlen > block.len() {
                return Err(SysError::InvalidParam);
            }
        }
        let sender_out = if args[2] == ARG_NONE {
            None
        } else {
            let h = mem_handle_arg(args[2])?;
            let block =
                self.arena.deref(h).ok_or(SysError::InvalidParam)?;
            if block.len() < core::mem::size_of::<i32>() {
                return Err(SysError::InvalidParam);
            }
            Some(h)
        };

        let mut tmp = [0; MAX_MESSAGE_DATA];
        let eff = maxlen.min(MAX_MESSAGE_DATA);
        let current = self.current_task;
        let (len, from) = self.queues[current].pop(&mut tmp[..eff])?;

        if let Some(block) = self.arena.deref_mut(out) {
            block[..len].copy_from_slice(&tmp[..len]);
        }
        if let Some(h) = sender_out {
            if let Some(block) = self.arena.deref_mut(h) {
                block[..4].copy_from_slice((from as i32).as_bytes());
            }
        }
        Ok(len as i32)
    }

    fn i2c_write_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        self.require(Permissions::I2C)?;
        let handle = mem_handle_arg(args[1])?;
        let len = args[2] as usize;
        let block = self.arena.deref(handle).ok_or(SysError::InvalidParam)?;
        if len == 0 || len > block.len() {
            return Err(SysError::InvalidParam);
        }
        let n = self
            .platform
            .i2c()
            .write(args[0] as u8, &block[..len])
            .map_err(|_| SysError::IoError)?;
        Ok(n as i32)
    }

    fn i2c_read_block(&mut self, args: [u32; 4]) -> Result<i32, SysError> {
        self.require(Permissions::I2C)?;
        let handle = mem_handle_arg(args[1])?;
        let len = args[2] as usize;
        let block = self
            .arena
            .deref_mut(handle)
            .ok_or(SysError::InvalidParam)?;
        if len == 0 || len > block.len() {
            return Err(SysError::InvalidParam);
        }
        let n = self
            .platform
            .i2c()
            .read(args[0] as u8, &mut block[..len])
            .map_err(|_| SysError::IoError)?;
        Ok(n as i32)
    }

    fn spi_transfer_blocks(
        &mut self,
        args: [u32; 4],
    ) -> Result<i32, SysError> {
        self.require(Permissions::SPI)?;
        let len = args[2] as usize;
        if len == 0 {
            return Err(SysError::InvalidParam);
        }
        let tx = if args[0] == ARG_NONE {
            None
        } else {
            Some(mem_handle_arg(args[0])?)
        };
        let rx = if args[1] == ARG_NONE {
            None
        } else {
            Some(mem_handle_arg(args[1])?)
        };
        if tx.is_none() && rx.is_none() {
            return Err(SysError::InvalidParam);
        }

        for h in [tx, rx].into_iter().flatten() {
            let block = self.arena.deref(h).ok_or(SysError::InvalidParam)?;
            if len > block.len() {
                return Err(SysError::InvalidParam);
            }
        }

        // One byte per step, refetching the blocks each time; the borrows
        // of the arena and the bus cannot be held simultaneously across the
        // exchange, and transfers on this class of hardware are short.
        for i in 0..len {
            let out = match tx {
                Some(h) => self
                    .arena
                    .deref(h)
                    .and_then(|b| b.get(i).copied())
                    .unwrap_or(0),
                None => 0,
            };
            let got = self.platform.spi().transfer_byte(out);
            if let Some(h) = rx {
                if let Some(block) = self.arena.deref_mut(h) {
                    if let Some(slot) = block.get_mut(i) {
                        *slot = got;
                    }
                }
            }
        }
        Ok(len as i32)
    }
}
