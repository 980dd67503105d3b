// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The terminal diagnostic path, plus the task listing and memory summary
//! it is built from.
//!
//! Only two conditions reach [`Kernel::panic`]: arena corruption detected
//! during compaction, and an explicit invariant failure from a component.
//! Everything else in this kernel is an ordinary error return. The panic
//! path writes everything a human could want -- the message, the current
//! task and its recorded frames, the task table, the memory summary -- and
//! then asks the board to halt. It does not return.

use abi::TaskState;

use crate::kernel::Kernel;
use crate::platform::Platform;

impl<'h, P: Platform> Kernel<'h, P> {
    /// Terminal failure: dump state and halt. Never returns.
    pub fn panic(&mut self, msg: &str) -> ! {
        self.platform.console_line(format_args!(""));
        self.platform
            .console_line(format_args!("!!! KERNEL PANIC !!!"));
        self.platform.console_line(format_args!("{}", msg));

        let id = self.current_task;
        let name = self.tasks[id].name();
        self.platform.console_line(format_args!(
            "Current task: {} (id {})",
            name, id
        ));
        self.print_stack_trace(id);

        self.print_task_list();
        self.print_memory_info();

        self.platform.console_line(format_args!("System halted."));
        self.platform.halt()
    }

    /// Recorded frames for one task. With no unwinder, this is usually just
    /// the entry point, but that is the frame that matters on a board where
    /// every task is one function.
    pub fn print_stack_trace(&mut self, id: usize) {
        let frames = self.tasks[id].frames();
        if frames.is_empty() {
            self.platform
                .console_line(format_args!("No stack trace available"));
            return;
        }
        self.platform
            .console_line(format_args!("=== Stack Trace ==="));
        for (i, frame) in frames.iter().enumerate() {
            self.platform.console_line(format_args!(
                "  [{}] {} @ {:#x}",
                i, frame.symbol, frame.address
            ));
        }
    }

    /// One line per occupied task slot: id, name, state, memory charged to
    /// the task, and how long it has gone without yielding.
    pub fn print_task_list(&mut self) {
        let now = self.now();
        self.platform
            .console_line(format_args!("=== Task List ==="));
        self.platform.console_line(format_args!(
            "{:<3} {:<15} {:<10} {:>8}  {}",
            "ID", "Name", "State", "Memory", "LastYield"
        ));
        for (id, task) in self.tasks.iter().enumerate() {
            let state = match task.state() {
                TaskState::Empty => continue,
                TaskState::Ready => "READY",
                TaskState::Running => "RUNNING",
                TaskState::Sleeping => "SLEEPING",
                TaskState::Blocked => "BLOCKED",
                TaskState::Zombie => "ZOMBIE",
            };
            self.platform.console_line(format_args!(
                "{:<3} {:<15} {:<10} {:>7}B  {}ms",
                id,
                task.name(),
                state,
                task.memory_used(),
                task.ms_since_yield(now)
            ));
        }
    }

    /// Arena occupancy summary: totals plus a block census.
    pub fn print_memory_info(&mut self) {
        self.platform
            .console_line(format_args!("=== Memory Info ==="));
        self.platform.console_line(format_args!(
            "Total heap:     {} bytes",
            self.arena.capacity()
        ));
        self.platform.console_line(format_args!(
            "Used:           {} bytes",
            self.arena.heap_used()
        ));
        self.platform.console_line(format_args!(
            "Available:      {} bytes",
            self.arena.available()
        ));

        let mut used_blocks = 0;
        let mut free_blocks = 0;
        for (_, header) in self.arena.blocks() {
            if header.is_in_use() {
                used_blocks += 1;
            } else {
                free_blocks += 1;
            }
        }
        self.platform.console_line(format_args!(
            "Used blocks:    {}",
            used_blocks
        ));
        self.platform.console_line(format_args!(
            "Free blocks:    {}",
            free_blocks
        ));
        if free_blocks > 0 {
            self.platform.console_line(format_args!(
                "Fragmentation detected - consider compacting"
            ));
        }
    }
}
