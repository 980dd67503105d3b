// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resource-handle tables, and the file/directory operations built on them.
//!
//! A handle is a small integer naming a row in a fixed table. One generic
//! table type serves both files and directories (and is the machinery a
//! future driver gate would reuse): each row records its resource and the
//! owning task, and every lookup runs the same ladder -- index in range,
//! row occupied, caller is the owner. The permission *bit* check happens in
//! the operations below, because which bit applies depends on the
//! operation, not on the table.

use abi::{
    Permissions, SysError, MAX_DIR_HANDLES, MAX_FILE_HANDLES,
};
use drv_sd_api::{DirEntry, Filesystem, FsNode};

use crate::kernel::Kernel;
use crate::platform::Platform;

/// One occupied row.
pub struct Slot<T> {
    pub resource: T,
    pub owner: usize,
}

/// Fixed-capacity table of owned resources.
pub struct HandleTable<T, const N: usize> {
    slots: [Option<Slot<T>>; N],
}

impl<T, const N: usize> HandleTable<T, N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn has_vacancy(&self) -> bool {
        self.slots.iter().any(|s| s.is_none())
    }

    pub fn in_use(&self, handle: usize) -> bool {
        matches!(self.slots.get(handle), Some(Some(_)))
    }

    /// Claims the lowest free row.
    pub fn insert(&mut self, resource: T, owner: usize) -> Result<usize, SysError> {
        let handle = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(SysError::NoMemory)?;
        self.slots[handle] = Some(Slot { resource, owner });
        Ok(handle)
    }

    /// The shared validation ladder: range, occupancy, ownership.
    pub fn get_mut(
        &mut self,
        handle: usize,
        caller: usize,
    ) -> Result<&mut Slot<T>, SysError> {
        let slot = self
            .slots
            .get_mut(handle)
            .ok_or(SysError::InvalidParam)?
            .as_mut()
            .ok_or(SysError::InvalidParam)?;
        if slot.owner != caller {
            return Err(SysError::Permission);
        }
        Ok(slot)
    }

    /// Releases a row, returning the resource so the caller can close it.
    pub fn remove(&mut self, handle: usize, caller: usize) -> Result<T, SysError> {
        // Validate before taking so a denied close leaves the row alone.
        self.get_mut(handle, caller)?;
        let slot = self.slots[handle].take();
        match slot {
            Some(s) => Ok(s.resource),
            // Unreachable given the validation above.
            None => Err(SysError::InvalidParam),
        }
    }

    /// Drops every row owned by `owner`. Used when a task dies.
    pub fn remove_owned(&mut self, owner: usize) {
        for slot in &mut self.slots {
            if matches!(slot, Some(s) if s.owner == owner) {
                *slot = None;
            }
        }
    }
}

impl<T, const N: usize> Default for HandleTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A file table row's resource: the storage node plus the access mode it
/// was opened with.
pub struct FileResource<N> {
    pub node: N,
    pub can_write: bool,
}

pub type FsNodeOf<P> = <<P as Platform>::Fs as Filesystem>::Node;
pub type FileTable<P> =
    HandleTable<FileResource<FsNodeOf<P>>, MAX_FILE_HANDLES>;
pub type DirTable<P> = HandleTable<FsNodeOf<P>, MAX_DIR_HANDLES>;

impl<'h, P: Platform> Kernel<'h, P> {
    /// Opens `path`, claiming a file handle owned by the current task.
    pub fn file_open(
        &mut self,
        path: &str,
        write: bool,
    ) -> Result<usize, SysError> {
        if self.platform.filesystem().is_none() {
            return Err(SysError::IoError);
        }
        self.require(Permissions::SD)?;
        if !self.files.has_vacancy() {
            return Err(SysError::NoMemory);
        }

        let caller = self.current_task;
        let fs = self.platform.filesystem().ok_or(SysError::IoError)?;
        let node = fs.open(path, write).ok_or(SysError::NotFound)?;
        let handle = self.files.insert(
            FileResource {
                node,
                can_write: write,
            },
            caller,
        )?;
        self.tasks[caller].set_file_bit(handle, true);
        Ok(handle)
    }

    /// Closes a handle: releases the node and clears the owner's bitmap
    /// bit. Closing an already-closed handle is `InvalidParam`.
    pub fn file_close(&mut self, handle: usize) -> Result<(), SysError> {
        let caller = self.current_task;
        let _node = self.files.remove(handle, caller)?;
        self.tasks[caller].set_file_bit(handle, false);
        Ok(())
    }

    pub fn file_read(
        &mut self,
        handle: usize,
        buf: &mut [u8],
    ) -> Result<usize, SysError> {
        let caller = self.current_task;
        let slot = self.files.get_mut(handle, caller)?;
        slot.resource.node.read(buf).map_err(|_| SysError::IoError)
    }

    pub fn file_write(
        &mut self,
        handle: usize,
        data: &[u8],
    ) -> Result<usize, SysError> {
        let caller = self.current_task;
        let slot = self.files.get_mut(handle, caller)?;
        if !slot.resource.can_write {
            return Err(SysError::Permission);
        }
        slot.resource.node.write(data).map_err(|_| SysError::IoError)
    }

    pub fn file_delete(&mut self, path: &str) -> Result<(), SysError> {
        if self.platform.filesystem().is_none() {
            return Err(SysError::IoError);
        }
        self.require(Permissions::SD)?;
        let fs = self.platform.filesystem().ok_or(SysError::IoError)?;
        if fs.remove(path) {
            Ok(())
        } else {
            Err(SysError::NotFound)
        }
    }

    pub fn file_exists(&mut self, path: &str) -> Result<bool, SysError> {
        if self.platform.filesystem().is_none() {
            return Err(SysError::IoError);
        }
        self.require(Permissions::SD)?;
        let fs = self.platform.filesystem().ok_or(SysError::IoError)?;
        Ok(fs.exists(path))
    }

    pub fn file_size(&mut self, handle: usize) -> Result<u32, SysError> {
        let caller = self.current_task;
        let slot = self.files.get_mut(handle, caller)?;
        Ok(slot.resource.node.size())
    }

    /// Opens a directory for iteration. Opening a non-directory path with
    /// this call is `InvalidParam`, not `NotFound` -- the path resolved, it
    /// just isn't the right kind of thing.
    pub fn dir_open(&mut self, path: &str) -> Result<usize, SysError> {
        if self.platform.filesystem().is_none() {
            return Err(SysError::IoError);
        }
        self.require(Permissions::SD)?;
        if !self.dirs.has_vacancy() {
            return Err(SysError::NoMemory);
        }

        let caller = self.current_task;
        let fs = self.platform.filesystem().ok_or(SysError::IoError)?;
        let node = fs.open(path, false).ok_or(SysError::NotFound)?;
        if !node.is_directory() {
            return Err(SysError::InvalidParam);
        }
        let handle = self.dirs.insert(node, caller)?;
        self.tasks[caller].set_dir_bit(handle, true);
        Ok(handle)
    }

    pub fn dir_close(&mut self, handle: usize) -> Result<(), SysError> {
        let caller = self.current_task;
        let _node = self.dirs.remove(handle, caller)?;
        self.tasks[caller].set_dir_bit(handle, false);
        Ok(())
    }

    /// Yields the next child of an open directory, or `None` when the
    /// listing is exhausted.
    pub fn dir_read(
        &mut self,
        handle: usize,
    ) -> Result<Option<DirEntry>, SysError> {
        let caller = self.current_task;
        let slot = self.dirs.get_mut(handle, caller)?;
        match slot.resource.open_next_child() {
            Some(child) => Ok(Some(DirEntry::new(
                child.name(),
                child.is_directory(),
                child.size(),
            ))),
            None => Ok(None),
        }
    }

    pub fn dir_create(&mut self, path: &str) -> Result<(), SysError> {
        if self.platform.filesystem().is_none() {
            return Err(SysError::IoError);
        }
        self.require(Permissions::SD)?;
        let fs = self.platform.filesystem().ok_or(SysError::IoError)?;
        if fs.mkdir(path) {
            Ok(())
        } else {
            Err(SysError::IoError)
        }
    }

    pub fn dir_remove(&mut self, path: &str) -> Result<(), SysError> {
        if self.platform.filesystem().is_none() {
            return Err(SysError::IoError);
        }
        self.require(Permissions::SD)?;
        let fs = self.platform.filesystem().ok_or(SysError::IoError)?;
        if fs.rmdir(path) {
            Ok(())
        } else {
            Err(SysError::IoError)
        }
    }

    pub fn dir_rewind(&mut self, handle: usize) -> Result<(), SysError> {
        let caller = self.current_task;
        let slot = self.dirs.get_mut(handle, caller)?;
        slot.resource.rewind();
        Ok(())
    }
}
