// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task-facing kernel surface.
//!
//! A task's step function receives `&mut dyn TaskContext` and everything it
//! may do, it does through that context -- there is no other road into the
//! kernel from task code. Keeping the surface a trait keeps task functions
//! plain `fn`s, testable against the real kernel and readable on their own.
//!
//! Task-management calls (`create_task`, `kill_task`) and the bus calls are
//! permission-gated right here at the surface; the kernel internals behind
//! them assume an authorized caller.

use abi::{MemHandle, Permissions, SysError, MAX_TASKS};
use drv_ddi_api::PinMode;
use drv_sd_api::DirEntry;

use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::task::TaskEntry;

/// What a task can ask of the kernel.
pub trait TaskContext {
    /// The calling task's own id.
    fn task_id(&self) -> usize;

    /// Current kernel time in milliseconds (wrapping).
    fn now_ms(&self) -> u32;

    /// Milliseconds since the kernel booted.
    fn uptime_ms(&self) -> u32;

    /// Gives up the CPU until the scheduler comes back around.
    fn yield_now(&mut self);

    /// Gives up the CPU for at least `ms` milliseconds.
    fn sleep(&mut self, ms: u32);

    /// Starts a new task. Requires `CREATE_TASK`.
    fn create_task(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
    ) -> Result<usize, SysError>;

    /// Ends another task, releasing everything it owns. Requires
    /// `CREATE_TASK`. Killing an absent task succeeds vacuously; killing
    /// the idle task is refused.
    fn kill_task(&mut self, id: usize) -> Result<(), SysError>;

    /// Allocates from the kernel arena. `None` on exhaustion or for a
    /// zero-length request.
    fn alloc(&mut self, len: usize) -> Option<MemHandle>;

    /// Returns a block to the arena. Stale handles are tolerated.
    fn free(&mut self, handle: MemHandle);

    /// Borrows a block's bytes. The borrow cannot outlive the next kernel
    /// call -- fetch it fresh each time, never stash what it points at.
    fn mem(&mut self, handle: MemHandle) -> Option<&mut [u8]>;

    fn mem_available(&self) -> usize;

    fn mem_compact(&mut self);

    fn send(&mut self, to: usize, data: &[u8]) -> Result<(), SysError>;

    /// Takes the oldest pending message, returning `(length, sender)`.
    fn receive(&mut self, buf: &mut [u8])
        -> Result<(usize, usize), SysError>;

    fn poll(&self) -> usize;

    fn sem_create(
        &mut self,
        initial: u32,
        max: u32,
        name: Option<&'static str>,
    ) -> Result<usize, SysError>;

    fn sem_wait(&mut self, sem: usize, timeout_ms: u32)
        -> Result<(), SysError>;

    fn sem_post(&mut self, sem: usize) -> Result<(), SysError>;

    fn sem_destroy(&mut self, sem: usize) -> Result<(), SysError>;

    fn file_open(&mut self, path: &str, write: bool)
        -> Result<usize, SysError>;

    fn file_close(&mut self, handle: usize) -> Result<(), SysError>;

    fn file_read(
        &mut self,
        handle: usize,
        buf: &mut [u8],
    ) -> Result<usize, SysError>;

    fn file_write(
        &mut self,
        handle: usize,
        data: &[u8],
    ) -> Result<usize, SysError>;

    fn file_delete(&mut self, path: &str) -> Result<(), SysError>;

    fn file_exists(&mut self, path: &str) -> Result<bool, SysError>;

    fn file_size(&mut self, handle: usize) -> Result<u32, SysError>;

    fn dir_open(&mut self, path: &str) -> Result<usize, SysError>;

    fn dir_close(&mut self, handle: usize) -> Result<(), SysError>;

    fn dir_read(&mut self, handle: usize)
        -> Result<Option<DirEntry>, SysError>;

    fn dir_create(&mut self, path: &str) -> Result<(), SysError>;

    fn dir_remove(&mut self, path: &str) -> Result<(), SysError>;

    fn dir_rewind(&mut self, handle: usize) -> Result<(), SysError>;

    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), SysError>;

    fn digital_write(&mut self, pin: u8, high: bool)
        -> Result<(), SysError>;

    fn digital_read(&mut self, pin: u8) -> Result<bool, SysError>;

    fn analog_read(&mut self, pin: u8) -> Result<u16, SysError>;

    fn analog_write(&mut self, pin: u8, value: u16)
        -> Result<(), SysError>;

    fn i2c_begin(&mut self, address: Option<u8>) -> Result<(), SysError>;

    fn i2c_write(
        &mut self,
        address: u8,
        data: &[u8],
    ) -> Result<usize, SysError>;

    fn i2c_read(
        &mut self,
        address: u8,
        buf: &mut [u8],
    ) -> Result<usize, SysError>;

    fn i2c_request(
        &mut self,
        address: u8,
        quantity: usize,
    ) -> Result<usize, SysError>;

    fn spi_begin(&mut self) -> Result<(), SysError>;

    fn spi_transfer(
        &mut self,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
    ) -> Result<usize, SysError>;

    fn spi_end(&mut self) -> Result<(), SysError>;

    /// Prints a line prefixed with the calling task's name.
    fn print(&mut self, msg: &str);

    /// Prints a `[DEBUG]`-prefixed line.
    fn debug(&mut self, msg: &str);

    /// Raw numeric syscall, for code generated against the stable tag
    /// space rather than this trait.
    fn syscall(&mut self, nr: u32, args: [u32; 4]) -> i32;
}

/// The kernel-backed context handed to step functions.
pub(crate) struct Ctx<'a, 'h, P: Platform> {
    pub(crate) kernel: &'a mut Kernel<'h, P>,
}

impl<'a, 'h, P: Platform> TaskContext for Ctx<'a, 'h, P> {
    fn task_id(&self) -> usize {
        self.kernel.current_task()
    }

    fn now_ms(&self) -> u32 {
        self.kernel.now().millis()
    }

    fn uptime_ms(&self) -> u32 {
        self.kernel.uptime()
    }

    fn yield_now(&mut self) {
        self.kernel.yield_now();
    }

    fn sleep(&mut self, ms: u32) {
        self.kernel.sleep(ms);
    }

    fn create_task(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
    ) -> Result<usize, SysError> {
        self.kernel.require(Permissions::CREATE_TASK)?;
        self.kernel.create_task(name, entry)
    }

    fn kill_task(&mut self, id: usize) -> Result<(), SysError> {
        self.kernel.require(Permissions::CREATE_TASK)?;
        if id >= MAX_TASKS {
            return Err(SysError::InvalidParam);
        }
        self.kernel.kill_task(id);
        Ok(())
    }

    fn alloc(&mut self, len: usize) -> Option<MemHandle> {
        self.kernel.mem_alloc(len).ok()
    }

    fn free(&mut self, handle: MemHandle) {
        self.kernel.mem_free(handle);
    }

    fn mem(&mut self, handle: MemHandle) -> Option<&mut [u8]> {
        self.kernel.mem(handle)
    }

    fn mem_available(&self) -> usize {
        self.kernel.mem_available()
    }

    fn mem_compact(&mut self) {
        self.kernel.mem_compact();
    }

    fn send(&mut self, to: usize, data: &[u8]) -> Result<(), SysError> {
        self.kernel.send(to, data)
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(usize, usize), SysError> {
        self.kernel.receive(buf)
    }

    fn poll(&self) -> usize {
        self.kernel.poll()
    }

    fn sem_create(
        &mut self,
        initial: u32,
        max: u32,
        name: Option<&'static str>,
    ) -> Result<usize, SysError> {
        self.kernel.sem_create(initial, max, name)
    }

    fn sem_wait(
        &mut self,
        sem: usize,
        timeout_ms: u32,
    ) -> Result<(), SysError> {
        self.kernel.sem_wait(sem, timeout_ms)
    }

    fn sem_post(&mut self, sem: usize) -> Result<(), SysError> {
        self.kernel.sem_post(sem)
    }

    fn sem_destroy(&mut self, sem: usize) -> Result<(), SysError> {
        self.kernel.sem_destroy(sem)
    }

    fn file_open(
        &mut self,
        path: &str,
        write: bool,
    ) -> Result<usize, SysError> {
        self.kernel.file_open(path, write)
    }

    fn file_close(&mut self, handle: usize) -> Result<(), SysError> {
        self.kernel.file_close(handle)
    }

    fn file_read(
        &mut self,
        handle: usize,
        buf: &mut [u8],
    ) -> Result<usize, SysError> {
        self.kernel.file_read(handle, buf)
    }

    fn file_write(
        &mut self,
        handle: usize,
        data: &[u8],
    ) -> Result<usize, SysError> {
        self.kernel.file_write(handle, data)
    }

    fn file_delete(&mut self, path: &str) -> Result<(), SysError> {
        self.kernel.file_delete(path)
    }

    fn file_exists(&mut self, path: &str) -> Result<bool, SysError> {
        self.kernel.file_exists(path)
    }

    fn file_size(&mut self, handle: usize) -> Result<u32, SysError> {
        self.kernel.file_size(handle)
    }

    fn dir_open(&mut self, path: &str) -> Result<usize, SysError> {
        self.kernel.dir_open(path)
    }

    fn dir_close(&mut self, handle: usize) -> Result<(), SysError> {
        self.kernel.dir_close(handle)
    }

    fn dir_read(
        &mut self,
        handle: usize,
    ) -> Result<Option<DirEntry>, SysError> {
        self.kernel.dir_read(handle)
    }

    fn dir_create(&mut self, path: &str) -> Result<(), SysError> {
        self.kernel.dir_create(path)
    }

    fn dir_remove(&mut self, path: &str) -> Result<(), SysError> {
        self.kernel.dir_remove(path)
    }

    fn dir_rewind(&mut self, handle: usize) -> Result<(), SysError> {
        self.kernel.dir_rewind(handle)
    }

    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), SysError> {
        self.kernel.gpio_pin_mode(pin, mode)
    }

    fn digital_write(
        &mut self,
        pin: u8,
        high: bool,
    ) -> Result<(), SysError> {
        self.kernel.gpio_digital_write(pin, high)
    }

    fn digital_read(&mut self, pin: u8) -> Result<bool, SysError> {
        self.kernel.gpio_digital_read(pin)
    }

    fn analog_read(&mut self, pin: u8) -> Result<u16, SysError> {
        self.kernel.gpio_analog_read(pin)
    }

    fn analog_write(
        &mut self,
        pin: u8,
        value: u16,
    ) -> Result<(), SysError> {
        self.kernel.gpio_analog_write(pin, value)
    }

    fn i2c_begin(&mut self, address: Option<u8>) -> Result<(), SysError> {
        self.kernel.i2c_begin(address)
    }

    fn i2c_write(
        &mut self,
        address: u8,
        data: &[u8],
    ) -> Result<usize, SysError> {
        self.kernel.i2c_write(address, data)
    }

    fn i2c_read(
        &mut self,
        address: u8,
        buf: &mut [u8],
    ) -> Result<usize, SysError> {
        self.kernel.i2c_read(address, buf)
    }

    fn i2c_request(
        &mut self,
        address: u8,
        quantity: usize,
    ) -> Result<usize, SysError> {
        self.kernel.i2c_request(address, quantity)
    }

    fn spi_begin(&mut self) -> Result<(), SysError> {
        self.kernel.spi_begin()
    }

    fn spi_transfer(
        &mut self,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
    ) -> Result<usize, SysError> {
        self.kernel.spi_transfer(tx, rx)
    }

    fn spi_end(&mut self) -> Result<(), SysError> {
        self.kernel.spi_end()
    }

    fn print(&mut self, msg: &str) {
        self.kernel.print(msg);
    }

    fn debug(&mut self, msg: &str) {
        self.kernel.debug(msg);
    }

    fn syscall(&mut self, nr: u32, args: [u32; 4]) -> i32 {
        self.kernel.syscall(nr, args)
    }
}
