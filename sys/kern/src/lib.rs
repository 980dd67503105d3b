// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative kernel for microcontroller-class boards.
//!
//! This is the board-independent portion of the operating system. It
//! multiplexes one CPU among a fixed table of cooperative tasks, owns a
//! single relocating arena that serves every task allocation, moves
//! fixed-size messages between tasks through bounded per-task rings, and
//! meters access to storage and buses through permission-gated handle
//! tables. Boards plug in underneath through the [`platform::Platform`]
//! trait; task code talks to the kernel through [`context::TaskContext`].
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. One kernel object. All state lives in a [`kernel::Kernel`] value
//!    constructed once at boot and handed around explicitly. No statics, no
//!    interior mutability, nothing for a debugger to hunt for.
//! 2. Static configuration. Every table in the kernel is fixed-size, with
//!    the sizes set at compile time in the `abi` crate.
//! 3. Safe code only. The crate forbids `unsafe`; the arena moves blocks
//!    with slice copies and names them by handle rather than by pointer.
//! 4. A preference for simple and clear algorithms over fast and clever
//!    algorithms. Table scans are linear; the tables have eight entries.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod arena;
pub mod context;
pub mod ddi;
pub mod fail;
pub mod handles;
pub mod ipc;
pub mod kernel;
pub mod platform;
pub mod sem;
pub mod syscalls;
pub mod task;
pub mod time;

pub use context::TaskContext;
pub use kernel::{Event, Kernel};
pub use platform::Platform;
pub use task::TaskEntry;
pub use time::Timestamp;
