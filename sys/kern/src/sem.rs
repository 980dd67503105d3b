// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores.
//!
//! A fixed pool of semaphores shared by all tasks. The table here is pure
//! bookkeeping -- create, try-take, post, destroy. The *waiting* part of
//! `sem_wait` lives on the kernel, because waiting in a cooperative system
//! means yielding, and yielding needs the scheduler and the clock.

use abi::{SysError, IDLE_TASK, MAX_SEMAPHORES};

#[derive(Copy, Clone, Debug)]
struct Semaphore {
    value: u32,
    max_value: u32,
    in_use: bool,
    owner: usize,
    name: Option<&'static str>,
}

impl Semaphore {
    const VACANT: Self = Self {
        value: 0,
        max_value: 0,
        in_use: false,
        owner: 0,
        name: None,
    };
}

pub struct SemTable {
    sems: [Semaphore; MAX_SEMAPHORES],
}

impl SemTable {
    pub fn new() -> Self {
        Self {
            sems: [Semaphore::VACANT; MAX_SEMAPHORES],
        }
    }

    /// Claims the lowest free slot. `max` must be at least 1 and `initial`
    /// must not exceed it.
    pub fn create(
        &mut self,
        initial: u32,
        max: u32,
        name: Option<&'static str>,
        owner: usize,
    ) -> Result<usize, SysError> {
        if max < 1 || initial > max {
            return Err(SysError::InvalidParam);
        }
        let id = self
            .sems
            .iter()
            .position(|s| !s.in_use)
            .ok_or(SysError::NoMemory)?;
        self.sems[id] = Semaphore {
            value: initial,
            max_value: max,
            in_use: true,
            owner,
            name,
        };
        Ok(id)
    }

    /// Non-blocking acquisition attempt: `Ok(true)` when the count was
    /// positive and has been taken, `Ok(false)` when the caller must wait.
    pub fn try_take(&mut self, id: usize) -> Result<bool, SysError> {
        let sem = self.get_mut(id)?;
        if sem.value == 0 {
            Ok(false)
        } else {
            sem.value -= 1;
            Ok(true)
        }
    }

    /// Releases one count. Posting a semaphore already at its maximum is an
    /// error, not a silent clamp.
    pub fn post(&mut self, id: usize) -> Result<(), SysError> {
        let sem = self.get_mut(id)?;
        if sem.value >= sem.max_value {
            return Err(SysError::InvalidParam);
        }
        sem.value += 1;
        Ok(())
    }

    /// Frees the slot. Only the creating task, or the idle/supervisor slot,
    /// may do this.
    pub fn destroy(&mut self, id: usize, caller: usize) -> Result<(), SysError> {
        let sem = self.get_mut(id)?;
        if sem.owner != caller && caller != IDLE_TASK {
            return Err(SysError::Permission);
        }
        *sem = Semaphore::VACANT;
        Ok(())
    }

    /// Frees every semaphore created by `owner`. Used when a task dies.
    /// Returns how many were destroyed.
    pub fn destroy_owned(&mut self, owner: usize) -> usize {
        let mut n = 0;
        for sem in &mut self.sems {
            if sem.in_use && sem.owner == owner {
                *sem = Semaphore::VACANT;
                n += 1;
            }
        }
        n
    }

    /// Current count, for diagnostics and tests.
    pub fn value(&self, id: usize) -> Result<u32, SysError> {
        let sem = self.sems.get(id).ok_or(SysError::InvalidParam)?;
        if !sem.in_use {
            return Err(SysError::NotFound);
        }
        Ok(sem.value)
    }

    fn get_mut(&mut self, id: usize) -> Result<&mut Semaphore, SysError> {
        let sem = self.sems.get_mut(id).ok_or(SysError::InvalidParam)?;
        if !sem.in_use {
            return Err(SysError::NotFound);
        }
        Ok(sem)
    }
}

impl Default for SemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_validates_its_bounds() {
        let mut t = SemTable::new();
        assert_eq!(t.create(0, 0, None, 1), Err(SysError::InvalidParam));
        assert_eq!(t.create(3, 2, None, 1), Err(SysError::InvalidParam));
        let id = t.create(2, 2, Some("pool"), 1).expect("valid bounds");
        assert_eq!(t.value(id), Ok(2));
    }

    #[test]
    fn pool_exhaustion_reports_no_memory() {
        let mut t = SemTable::new();
        for _ in 0..MAX_SEMAPHORES {
            t.create(0, 1, None, 1).expect("pool has room");
        }
        assert_eq!(t.create(0, 1, None, 1), Err(SysError::NoMemory));
    }

    #[test]
    fn take_and_post_move_the_count_within_bounds() {
        let mut t = SemTable::new();
        let id = t.create(1, 2, None, 1).expect("valid bounds");

        assert_eq!(t.try_take(id), Ok(true));
        assert_eq!(t.try_take(id), Ok(false), "count exhausted");

        t.post(id).expect("room below max");
        t.post(id).expect("room below max");
        assert_eq!(t.post(id), Err(SysError::InvalidParam), "already at max");
        assert_eq!(t.value(id), Ok(2));
    }

    #[test]
    fn destroy_is_owner_or_supervisor_only() {
        let mut t = SemTable::new();
        let id = t.create(0, 1, None, 3).expect("valid bounds");

        assert_eq!(t.destroy(id, 4), Err(SysError::Permission));
        assert!(t.value(id).is_ok(), "denied destroy must not free");

        t.destroy(id, 3).expect("owner may destroy");
        assert_eq!(t.value(id), Err(SysError::NotFound));

        let id = t.create(0, 1, None, 3).expect("slot is free again");
        t.destroy(id, IDLE_TASK).expect("supervisor may destroy");
    }

    #[test]
    fn bad_ids_split_into_range_and_liveness_errors() {
        let mut t = SemTable::new();
        assert_eq!(t.try_take(MAX_SEMAPHORES), Err(SysError::InvalidParam));
        assert_eq!(t.try_take(0), Err(SysError::NotFound));
        assert_eq!(t.post(0), Err(SysError::NotFound));
        assert_eq!(t.destroy(0, 0), Err(SysError::NotFound));
    }

    #[test]
    fn death_sweep_frees_only_that_owners_slots() {
        let mut t = SemTable::new();
        let a = t.create(0, 1, None, 2).expect("room");
        let b = t.create(0, 1, None, 5).expect("room");
        let c = t.create(0, 1, None, 2).expect("room");

        assert_eq!(t.destroy_owned(2), 2);
        assert_eq!(t.value(a), Err(SysError::NotFound));
        assert_eq!(t.value(c), Err(SysError::NotFound));
        assert!(t.value(b).is_ok());
    }
}
