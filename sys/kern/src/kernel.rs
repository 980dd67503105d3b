// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel object: task table, scheduler, watchdog, and the glue that
//! ties the arena, IPC, and handle tables together.

use abi::{
    MemHandle, Permissions, Priority, SysError, TaskState, TaskStatus,
    IDLE_TASK, MAX_TASKS, WATCHDOG_CHECK_INTERVAL_MS, WATCHDOG_TIMEOUT_MS,
};
use ringbuf::Ringbuf;

use crate::arena::{AllocError, Arena};
use crate::context::Ctx;
use crate::handles::{DirTable, FileTable, HandleTable};
use crate::ipc::MessageQueue;
use crate::platform::Platform;
use crate::sem::SemTable;
use crate::task::{self, Task, TaskEntry};
use crate::time::Timestamp;

/// Trace events recorded in the kernel's ring buffer. These are for a human
/// with a debugger; nothing in the kernel reads them back.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Boot,
    TaskCreated(usize),
    TaskKilled(usize),
    /// The watchdog forced this task back to Ready.
    WatchdogTrip(usize),
    Compacted {
        moved_blocks: u32,
        freed_bytes: u32,
    },
}

/// Depth of the kernel trace ring.
pub const TRACE_DEPTH: usize = 16;

/// All kernel state, constructed once at boot.
///
/// `'h` is the lifetime of the borrowed arena backing; `P` is the board.
/// There are no statics anywhere in the kernel -- whoever owns this value
/// owns the operating system.
pub struct Kernel<'h, P: Platform> {
    pub(crate) platform: P,
    pub(crate) tasks: [Task; MAX_TASKS],
    pub(crate) current_task: usize,
    pub(crate) arena: Arena<'h>,
    pub(crate) queues: [MessageQueue; MAX_TASKS],
    pub(crate) semaphores: SemTable,
    pub(crate) files: FileTable<P>,
    pub(crate) dirs: DirTable<P>,
    pub(crate) watchdog_enabled: bool,
    pub(crate) watchdog_last_check: Timestamp,
    pub(crate) boot_time: Timestamp,
    pub(crate) trace: Ringbuf<Event, TRACE_DEPTH>,
}

impl<'h, P: Platform> Kernel<'h, P> {
    /// Boots the kernel: builds every table, installs the idle task in slot
    /// 0, and records the boot time. The heap slice becomes the arena; its
    /// length is the heap size for this board.
    pub fn new(mut platform: P, heap: &'h mut [u8]) -> Self {
        let now = Timestamp::from(platform.now_ms());

        platform.console_line(format_args!(
            "kernel: {} task slots, {} byte arena",
            MAX_TASKS,
            heap.len()
        ));
        if platform.filesystem().is_none() {
            platform.console_line(format_args!(
                "kernel: warning: no storage volume present"
            ));
        }

        let mut tasks: [Task; MAX_TASKS] =
            core::array::from_fn(|_| Task::vacant());
        tasks[IDLE_TASK] = Task::idle(now);

        let mut kernel = Self {
            platform,
            tasks,
            current_task: IDLE_TASK,
            arena: Arena::new(heap),
            queues: core::array::from_fn(|_| MessageQueue::new()),
            semaphores: SemTable::new(),
            files: HandleTable::new(),
            dirs: HandleTable::new(),
            watchdog_enabled: true,
            watchdog_last_check: now,
            boot_time: now,
            trace: Ringbuf::new(Event::Boot),
        };
        kernel.trace.entry(Event::Boot);
        kernel
    }

    /// Current kernel time.
    pub fn now(&self) -> Timestamp {
        Timestamp::from(self.platform.now_ms())
    }

    /// Milliseconds since boot.
    pub fn uptime(&self) -> u32 {
        self.now().elapsed_since(self.boot_time)
    }

    pub fn current_task(&self) -> usize {
        self.current_task
    }

    pub fn task_state(&self, id: usize) -> TaskState {
        self.tasks
            .get(id)
            .map(|t| t.state())
            .unwrap_or(TaskState::Empty)
    }

    /// Snapshot of every occupied task slot.
    pub fn task_statuses(
        &self,
    ) -> impl Iterator<Item = TaskStatus> + '_ {
        let now = self.now();
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state() != TaskState::Empty)
            .map(move |(id, t)| t.status(id, now))
    }

    /// Read-only view of the arena, for diagnostics.
    pub fn arena(&self) -> &Arena<'h> {
        &self.arena
    }

    /// Read-only view of the trace ring, for diagnostics.
    pub fn trace(&self) -> &Ringbuf<Event, TRACE_DEPTH> {
        &self.trace
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// One line to the diagnostic sink.
    pub(crate) fn klog(&mut self, args: core::fmt::Arguments<'_>) {
        self.platform.console_line(args);
    }

    /// Fails with `Permission` unless the current task holds `perm`.
    pub(crate) fn require(&self, perm: Permissions) -> Result<(), SysError> {
        if self.tasks[self.current_task].has_permission(perm) {
            Ok(())
        } else {
            Err(SysError::Permission)
        }
    }

    // --- Task lifecycle ---------------------------------------------------

    /// Claims the lowest free slot at id >= 1 for a new task. The new
    /// task's message ring is reset so it cannot inherit a predecessor's
    /// mail.
    pub fn create_task(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
    ) -> Result<usize, SysError> {
        let now = self.now();
        let id = (1..MAX_TASKS)
            .find(|&i| self.tasks[i].state() == TaskState::Empty)
            .ok_or(SysError::NoMemory)?;

        self.tasks[id] = Task::create(name, entry, now);
        self.queues[id].reset();
        self.trace.entry(Event::TaskCreated(id));
        self.klog(format_args!("task created: {} (id {})", name, id));
        Ok(id)
    }

    /// Removes a task and everything it owns: file and directory handles,
    /// semaphores it created, and its arena blocks. Absent ids are a no-op,
    /// as is the idle task.
    ///
    /// Sweeping the arena here is a deliberate policy choice: leaving the
    /// blocks in-use would strand them with an owner id that no longer
    /// names a live task.
    pub fn kill_task(&mut self, id: usize) {
        if id == IDLE_TASK || id >= MAX_TASKS {
            return;
        }
        if self.tasks[id].state() == TaskState::Empty {
            return;
        }

        self.files.remove_owned(id);
        self.dirs.remove_owned(id);
        self.semaphores.destroy_owned(id);
        let swept = self.arena.release_owned(id as i32);

        let name = self.tasks[id].name();
        self.tasks[id].vacate();
        self.trace.entry(Event::TaskKilled(id));
        if swept > 0 {
            self.klog(format_args!(
                "task killed: {} ({} heap bytes swept)",
                name, swept
            ));
        } else {
            self.klog(format_args!("task killed: {}", name));
        }
    }

    /// Voluntary yield by the current task.
    pub fn yield_now(&mut self) {
        let now = self.now();
        self.tasks[self.current_task].record_yield(now);
    }

    /// Puts the current task to sleep for at least `ms` milliseconds.
    pub fn sleep(&mut self, ms: u32) {
        let now = self.now();
        self.tasks[self.current_task].start_sleep(now.plus_ms(ms), now);
    }

    pub fn set_priority(
        &mut self,
        id: usize,
        priority: Priority,
    ) -> Result<(), SysError> {
        let task = self.tasks.get_mut(id).ok_or(SysError::InvalidParam)?;
        if task.state() == TaskState::Empty {
            return Err(SysError::NotFound);
        }
        task.set_priority(priority);
        Ok(())
    }

    /// Board-level permission wiring, done at boot before tasks run.
    pub fn set_permissions(
        &mut self,
        id: usize,
        perms: Permissions,
    ) -> Result<(), SysError> {
        let task = self.tasks.get_mut(id).ok_or(SysError::InvalidParam)?;
        if task.state() == TaskState::Empty {
            return Err(SysError::NotFound);
        }
        task.set_permissions(perms);
        Ok(())
    }

    // --- Scheduler & watchdog ---------------------------------------------

    /// One scheduler tick: watchdog sweep, sleeper wake-ups, pick, run.
    ///
    /// The chosen task's step function is invoked exactly once and runs to
    /// completion. Everything the kernel does happens inside somebody's
    /// tick.
    pub fn schedule(&mut self) {
        self.check_watchdog();

        let now = self.now();
        for task in &mut self.tasks {
            task.wake_if_due(now);
        }

        let best = task::select(&self.tasks);
        if best != self.current_task {
            if self.tasks[self.current_task].state() == TaskState::Running {
                self.tasks[self.current_task].set_state(TaskState::Ready);
            }
            self.current_task = best;
        }
        // Covers both a fresh pick and a task the watchdog knocked back to
        // Ready while it remained the best choice.
        if self.tasks[self.current_task].state() == TaskState::Ready {
            self.tasks[self.current_task].mark_running(now);
        }

        if let Some(entry) = self.tasks[self.current_task].entry() {
            if self.tasks[self.current_task].state() == TaskState::Running {
                let mut ctx = Ctx { kernel: self };
                entry(&mut ctx);
            }
        }
    }

    /// Refreshes the current task's watchdog stamp without yielding.
    pub fn feed_watchdog(&mut self) {
        let now = self.now();
        self.tasks[self.current_task].refresh_yield(now);
    }

    pub fn set_watchdog_enabled(&mut self, enabled: bool) {
        self.watchdog_enabled = enabled;
        self.klog(format_args!(
            "watchdog {}",
            if enabled { "enabled" } else { "disabled" }
        ));
    }

    /// Forces any task that has hogged the CPU past `WATCHDOG_TIMEOUT_MS`
    /// back to Ready. Runs at most once per check interval; never kills.
    fn check_watchdog(&mut self) {
        if !self.watchdog_enabled {
            return;
        }
        let now = self.now();
        if now.elapsed_since(self.watchdog_last_check)
            < WATCHDOG_CHECK_INTERVAL_MS
        {
            return;
        }
        self.watchdog_last_check = now;

        for id in 0..MAX_TASKS {
            let state = self.tasks[id].state();
            if state == TaskState::Empty || state == TaskState::Sleeping {
                continue;
            }
            let stalled_ms = self.tasks[id].ms_since_yield(now);
            if stalled_ms > WATCHDOG_TIMEOUT_MS {
                self.trace.entry(Event::WatchdogTrip(id));
                let name = self.tasks[id].name();
                self.klog(format_args!(
                    "watchdog: task {} has not yielded in {}ms, forcing \
                     reschedule",
                    name, stalled_ms
                ));
                if state == TaskState::Running {
                    self.tasks[id].set_state(TaskState::Ready);
                }
                self.tasks[id].refresh_yield(now);
            }
        }
    }

    // --- Arena ------------------------------------------------------------

    /// Allocates `len` bytes owned by the current task. If the arena is too
    /// full, compacts once and retries before giving up.
    pub fn mem_alloc(&mut self, len: usize) -> Result<MemHandle, SysError> {
        let owner = self.current_task as i32;
        match self.arena.try_alloc(len, owner) {
            Ok(h) => {
                self.charge_owner(owner, h);
                Ok(h)
            }
            Err(AllocError::ZeroSize) => Err(SysError::InvalidParam),
            Err(AllocError::NoHandles) => {
                self.klog(format_args!("memory: handle table full"));
                Err(SysError::NoMemory)
            }
            Err(AllocError::NoSpace) => {
                self.klog(format_args!(
                    "memory: out of space, compacting..."
                ));
                self.compact_arena();
                match self.arena.try_alloc(len, owner) {
                    Ok(h) => {
                        self.charge_owner(owner, h);
                        Ok(h)
                    }
                    Err(_) => {
                        self.klog(format_args!(
                            "memory: out of memory after compaction"
                        ));
                        Err(SysError::NoMemory)
                    }
                }
            }
        }
    }

    /// Releases a block. An invalid or stale handle gets a warning line and
    /// is otherwise ignored, matching the tolerance `free(NULL)` has always
    /// enjoyed.
    pub fn mem_free(&mut self, handle: MemHandle) {
        match self.arena.free(handle) {
            Ok(info) => {
                if info.owner >= 0 {
                    if let Some(task) =
                        self.tasks.get_mut(info.owner as usize)
                    {
                        task.credit_mem(info.size);
                    }
                }
            }
            Err(_) => {
                self.klog(format_args!("memory: warning: invalid free"));
            }
        }
    }

    /// Scoped access to a block's bytes. The borrow ends before the next
    /// kernel call, which is what makes compaction safe.
    pub fn mem(&mut self, handle: MemHandle) -> Option<&mut [u8]> {
        self.arena.deref_mut(handle)
    }

    pub fn mem_available(&self) -> usize {
        self.arena.available()
    }

    /// Explicit compaction request.
    pub fn mem_compact(&mut self) {
        self.compact_arena();
    }

    fn compact_arena(&mut self) {
        match self.arena.compact() {
            Ok(stats) => {
                self.trace.entry(Event::Compacted {
                    moved_blocks: stats.moved_blocks as u32,
                    freed_bytes: stats.freed_bytes as u32,
                });
                self.klog(format_args!(
                    "memory: compaction freed {} bytes, moved {} blocks",
                    stats.freed_bytes, stats.moved_blocks
                ));
            }
            Err(_) => {
                self.panic("heap corruption detected during compaction");
            }
        }
    }

    fn charge_owner(&mut self, owner: i32, handle: MemHandle) {
        let size = self.arena.deref(handle).map(|b| b.len()).unwrap_or(0);
        if owner >= 0 {
            if let Some(task) = self.tasks.get_mut(owner as usize) {
                task.charge_mem(size);
            }
        }
    }

    // --- IPC --------------------------------------------------------------

    /// Queues `data` on the recipient's ring. Non-blocking.
    pub fn send(&mut self, to: usize, data: &[u8]) -> Result<(), SysError> {
        if to >= MAX_TASKS {
            return Err(SysError::InvalidParam);
        }
        if self.tasks[to].state() == TaskState::Empty {
            return Err(SysError::NotFound);
        }
        let from = self.current_task;
        let now = self.now();
        self.queues[to].push(from, to, data, now)
    }

    /// Takes the oldest message addressed to the current task, returning
    /// `(length, sender)`.
    pub fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(usize, usize), SysError> {
        self.queues[self.current_task].pop(buf)
    }

    /// Number of messages waiting for the current task.
    pub fn poll(&self) -> usize {
        self.queues[self.current_task].count()
    }

    // --- Semaphores -------------------------------------------------------

    pub fn sem_create(
        &mut self,
        initial: u32,
        max: u32,
        name: Option<&'static str>,
    ) -> Result<usize, SysError> {
        let owner = self.current_task;
        self.semaphores.create(initial, max, name, owner)
    }

    /// Acquires one count, spin-yielding while the count is zero. A
    /// `timeout_ms` of 0 waits indefinitely. Each spin refreshes the
    /// caller's watchdog stamp via the yield, so a patient waiter is not a
    /// watchdog target.
    pub fn sem_wait(
        &mut self,
        id: usize,
        timeout_ms: u32,
    ) -> Result<(), SysError> {
        let start = self.now();
        loop {
            if self.semaphores.try_take(id)? {
                return Ok(());
            }
            if timeout_ms > 0
                && self.now().elapsed_since(start) >= timeout_ms
            {
                return Err(SysError::Timeout);
            }
            self.yield_now();
        }
    }

    pub fn sem_post(&mut self, id: usize) -> Result<(), SysError> {
        self.semaphores.post(id)
    }

    pub fn sem_destroy(&mut self, id: usize) -> Result<(), SysError> {
        let caller = self.current_task;
        self.semaphores.destroy(id, caller)
    }

    /// Current count of a semaphore, for diagnostics and tests.
    pub fn sem_value(&self, id: usize) -> Result<u32, SysError> {
        self.semaphores.value(id)
    }

    // --- Console utilities ------------------------------------------------

    /// Prints on behalf of the current task, prefixed with its name.
    pub fn print(&mut self, msg: &str) {
        let name = self.tasks[self.current_task].name();
        self.platform
            .console_line(format_args!("[{}] {}", name, msg));
    }

    pub fn debug(&mut self, msg: &str) {
        self.platform
            .console_line(format_args!("[DEBUG] {}", msg));
    }

    /// Runs `f` with `id` temporarily installed as the current task. Test
    /// support: lets a test issue syscalls as a particular task without
    /// routing through the scheduler.
    #[cfg(test)]
    pub(crate) fn as_task<R>(
        &mut self,
        id: usize,
        f: impl FnOnce(&mut dyn crate::context::TaskContext) -> R,
    ) -> R {
        let prev = self.current_task;
        self.current_task = id;
        let result = f(&mut Ctx { kernel: self });
        self.current_task = prev;
        result
    }
}
