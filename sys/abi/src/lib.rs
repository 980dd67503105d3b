// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and task code.
//!
//! Everything in this crate is part of the stable surface tasks program
//! against: configuration constants, task states, permission bits, error
//! kinds, syscall numbers, and the handle types that cross the syscall
//! boundary. Internal kernel bookkeeping lives in the `kern` crate instead.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of slots in the task table. Slot 0 is always the idle task.
pub const MAX_TASKS: usize = 8;

/// Number of rows in the global file handle table.
pub const MAX_FILE_HANDLES: usize = 16;

/// Number of rows in the global directory handle table.
pub const MAX_DIR_HANDLES: usize = 4;

/// Depth of each task's message ring.
pub const QUEUE_DEPTH: usize = 16;

/// Largest message payload, in bytes.
pub const MAX_MESSAGE_DATA: usize = 64;

/// Number of counting semaphores in the pool.
pub const MAX_SEMAPHORES: usize = 8;

/// Bound on recorded stack trace frames per task.
pub const MAX_STACK_FRAMES: usize = 8;

/// Number of live arena allocations the handle table can track at once.
pub const MAX_MEM_HANDLES: usize = 64;

/// A task that has not yielded for this long gets forced back to Ready.
pub const WATCHDOG_TIMEOUT_MS: u32 = 5000;

/// The watchdog sweep runs at most this often.
pub const WATCHDOG_CHECK_INTERVAL_MS: u32 = 1000;

/// Index of the idle task, which is always present and cannot be killed.
pub const IDLE_TASK: usize = 0;

/// Owner id recorded on arena blocks that belong to the kernel itself rather
/// than to any task.
pub const KERNEL_OWNER: i32 = -1;

/// State of one slot in the task table.
///
/// `Blocked` and `Zombie` are part of the state space for forward
/// compatibility; the current kernel never produces them, and the scheduler
/// ignores slots carrying them.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
pub enum TaskState {
    /// Slot is unoccupied and can be claimed by `create_task`.
    #[default]
    Empty,
    /// Task wants the CPU and is eligible for scheduling.
    Ready,
    /// Task is the one currently executing. Exactly one slot is in this
    /// state between any two syscalls.
    Running,
    /// Task gave up the CPU until its wake deadline passes.
    Sleeping,
    /// Reserved: task is parked on a kernel resource.
    Blocked,
    /// Reserved: task has finished but its slot has not been reaped.
    Zombie,
}

/// Indicates priority of a task.
///
/// Priorities are small numbers; numerically *higher* values are more
/// important, so a priority-10 worker outranks the priority-0 idle task.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means more important or
/// merely numerically greater. Use `is_more_important_than`.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Default,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority assigned to freshly created tasks.
    pub const DEFAULT: Self = Self(10);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities at call sites, and keeps the direction of the convention
    /// in exactly one place.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

bitflags::bitflags! {
    /// Per-task permission bits, checked at the syscall surface.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct Permissions: u8 {
        /// May open, create, and remove files and directories.
        const SD = 1 << 0;
        /// May draw to the display (reserved; display calls are not yet
        /// implemented).
        const DISPLAY = 1 << 1;
        /// May create and kill other tasks.
        const CREATE_TASK = 1 << 2;
        /// May drive digital and analog pins.
        const GPIO = 1 << 3;
        /// May use the I2C bus.
        const I2C = 1 << 4;
        /// May use the SPI bus.
        const SPI = 1 << 5;
    }
}

impl Permissions {
    /// Default grant for tasks made through `create_task`. I2C, SPI, and
    /// task management must be granted explicitly.
    pub const DEFAULT_TASK: Self =
        Self::SD.union(Self::DISPLAY).union(Self::GPIO);
}

/// Error kinds visible at the syscall surface.
///
/// The numeric dispatcher returns these as negative `i32`s; non-negative
/// results are success values. Component code returns the kind it detects
/// and the dispatcher never rewrites it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum SysError {
    /// Syscall number is unknown, reserved, or not expressible through the
    /// surface it was invoked on.
    InvalidCall = -1,
    /// Caller lacks the permission bit the operation requires, or does not
    /// own the resource it named.
    Permission = -2,
    /// A fixed table (task slots, handles, a message ring, the arena) is
    /// full.
    NoMemory = -3,
    /// The named task, path, or resource does not exist.
    NotFound = -4,
    /// The external medium failed or is absent.
    IoError = -5,
    /// An argument is out of range or names a resource in the wrong state.
    InvalidParam = -6,
    /// A bounded wait expired.
    Timeout = -7,
    /// The operation would need to block and the surface is non-blocking.
    WouldBlock = -8,
}

impl SysError {
    /// The negative integer form carried across the syscall surface.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<SysError> for i32 {
    fn from(e: SysError) -> Self {
        e.code()
    }
}

impl core::convert::TryFrom<i32> for SysError {
    type Error = ();

    fn try_from(x: i32) -> Result<Self, Self::Error> {
        match x {
            -1 => Ok(Self::InvalidCall),
            -2 => Ok(Self::Permission),
            -3 => Ok(Self::NoMemory),
            -4 => Ok(Self::NotFound),
            -5 => Ok(Self::IoError),
            -6 => Ok(Self::InvalidParam),
            -7 => Ok(Self::Timeout),
            -8 => Ok(Self::WouldBlock),
            _ => Err(()),
        }
    }
}

/// Enumeration of syscall numbers.
///
/// This table is append-only: numbers are never reused or reordered, so a
/// task built against an older kernel keeps working. The `Display*` group
/// and `TaskCreate` are reserved -- they dispatch to `InvalidCall` today.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    FileOpen = 0,
    FileClose = 1,
    FileRead = 2,
    FileWrite = 3,
    FileDelete = 4,
    FileExists = 5,
    FileSize = 6,

    DirOpen = 7,
    DirRead = 8,
    DirClose = 9,
    DirCreate = 10,
    DirRemove = 11,
    DirRewind = 12,

    MemAlloc = 13,
    MemFree = 14,
    MemInfo = 15,
    MemCompact = 16,

    DisplayClear = 17,
    DisplayPixel = 18,
    DisplayText = 19,
    DisplayRect = 20,
    DisplayUpdate = 21,

    TaskCreate = 22,
    TaskKill = 23,
    TaskYield = 24,
    TaskSleep = 25,
    TaskList = 26,

    IpcSend = 27,
    IpcReceive = 28,
    IpcPoll = 29,
    SemCreate = 30,
    SemWait = 31,
    SemPost = 32,
    SemDestroy = 33,

    GpioPinMode = 34,
    GpioWrite = 35,
    GpioRead = 36,
    GpioAnalogRead = 37,
    GpioAnalogWrite = 38,

    I2cBegin = 39,
    I2cWrite = 40,
    I2cRead = 41,
    I2cRequest = 42,

    SpiBegin = 43,
    SpiTransfer = 44,
    SpiEnd = 45,

    GetTime = 46,
    Print = 47,
    DbgPrint = 48,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't currently depend on
/// `num-traits` and this seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::FileOpen),
            1 => Ok(Self::FileClose),
            2 => Ok(Self::FileRead),
            3 => Ok(Self::FileWrite),
            4 => Ok(Self::FileDelete),
            5 => Ok(Self::FileExists),
            6 => Ok(Self::FileSize),
            7 => Ok(Self::DirOpen),
            8 => Ok(Self::DirRead),
            9 => Ok(Self::DirClose),
            10 => Ok(Self::DirCreate),
            11 => Ok(Self::DirRemove),
            12 => Ok(Self::DirRewind),
            13 => Ok(Self::MemAlloc),
            14 => Ok(Self::MemFree),
            15 => Ok(Self::MemInfo),
            16 => Ok(Self::MemCompact),
            17 => Ok(Self::DisplayClear),
            18 => Ok(Self::DisplayPixel),
            19 => Ok(Self::DisplayText),
            20 => Ok(Self::DisplayRect),
            21 => Ok(Self::DisplayUpdate),
            22 => Ok(Self::TaskCreate),
            23 => Ok(Self::TaskKill),
            24 => Ok(Self::TaskYield),
            25 => Ok(Self::TaskSleep),
            26 => Ok(Self::TaskList),
            27 => Ok(Self::IpcSend),
            28 => Ok(Self::IpcReceive),
            29 => Ok(Self::IpcPoll),
            30 => Ok(Self::SemCreate),
            31 => Ok(Self::SemWait),
            32 => Ok(Self::SemPost),
            33 => Ok(Self::SemDestroy),
            34 => Ok(Self::GpioPinMode),
            35 => Ok(Self::GpioWrite),
            36 => Ok(Self::GpioRead),
            37 => Ok(Self::GpioAnalogRead),
            38 => Ok(Self::GpioAnalogWrite),
            39 => Ok(Self::I2cBegin),
            40 => Ok(Self::I2cWrite),
            41 => Ok(Self::I2cRead),
            42 => Ok(Self::I2cRequest),
            43 => Ok(Self::SpiBegin),
            44 => Ok(Self::SpiTransfer),
            45 => Ok(Self::SpiEnd),
            46 => Ok(Self::GetTime),
            47 => Ok(Self::Print),
            48 => Ok(Self::DbgPrint),
            _ => Err(()),
        }
    }
}

/// Type used to track the reincarnation count of a memory handle slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        const MASK: u8 = ((1u16 << (16 - MemHandle::INDEX_BITS)) - 1) as u8;
        Generation(self.0.wrapping_add(1) & MASK)
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// Names a particular incarnation of an arena allocation.
///
/// A `MemHandle` combines two fields, a handle-table index and a generation
/// number. The generation is incremented each time the table slot is reused,
/// so a task holding a handle to memory it already freed gets a clean miss
/// instead of someone else's block. Handles stay valid across compaction;
/// the arena updates its table when it relocates blocks.
///
/// The index is in the lower `MemHandle::INDEX_BITS` bits, the generation in
/// the remaining top bits. The whole value fits comfortably in a
/// non-negative `i32`, which is how it travels through the numeric syscall
/// surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct MemHandle(pub u16);

impl MemHandle {
    /// Number of bits used to represent the table index, rather than the
    /// generation number.
    pub const INDEX_BITS: u32 = 10;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `MemHandle` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        MemHandle(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this handle.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this handle.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }
}

/// One row of the task listing, in a form external tooling can consume
/// directly.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct TaskStatus {
    pub id: usize,
    pub name: &'static str,
    pub state: TaskState,
    pub priority: Priority,
    pub memory_used: usize,
    pub ms_since_yield: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_the_wire_values() {
        for (e, code) in [
            (SysError::InvalidCall, -1),
            (SysError::Permission, -2),
            (SysError::NoMemory, -3),
            (SysError::NotFound, -4),
            (SysError::IoError, -5),
            (SysError::InvalidParam, -6),
            (SysError::Timeout, -7),
            (SysError::WouldBlock, -8),
        ] {
            assert_eq!(e.code(), code);
            assert_eq!(SysError::try_from(code), Ok(e));
        }
        assert_eq!(SysError::try_from(0), Err(()));
        assert_eq!(SysError::try_from(-9), Err(()));
    }

    #[test]
    fn sysnum_roundtrips_across_the_whole_table() {
        for n in 0..=48u32 {
            let s = Sysnum::try_from(n)
                .unwrap_or_else(|_| panic!("tag {n} should decode"));
            assert_eq!(s as u32, n, "tag {n} decoded to the wrong variant");
        }
        assert_eq!(Sysnum::try_from(49), Err(()));
    }

    #[test]
    fn mem_handle_packing() {
        let h = MemHandle::for_index_and_gen(5, Generation::from(3));
        assert_eq!(h.index(), 5);
        assert_eq!(h.generation(), Generation::from(3));
        // The numeric surface carries handles as non-negative i32s.
        assert!(i32::from(h.0) >= 0);
    }

    #[test]
    fn generation_wraps_within_its_field() {
        let mut g = Generation::ZERO;
        for _ in 0..1000 {
            g = g.next();
            let h = MemHandle::for_index_and_gen(MAX_MEM_HANDLES - 1, g);
            assert_eq!(h.generation(), g);
        }
    }

    #[test]
    fn priority_direction() {
        assert!(Priority(10).is_more_important_than(Priority(0)));
        assert!(!Priority(0).is_more_important_than(Priority(10)));
        assert!(!Priority(7).is_more_important_than(Priority(7)));
    }
}
