// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to external storage.
//!
//! The kernel never touches a card or flash chip directly; it goes through
//! the [`Filesystem`] and [`FsNode`] traits defined here, and the board
//! supplies the implementation. Paths are passed through uninterpreted --
//! whatever string the task hands the kernel is the string the filesystem
//! sees.

#![cfg_attr(not(test), no_std)]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Bound on a directory entry name, including its NUL padding.
pub const MAX_NAME: usize = 64;

/// Error from a node-level read or write.
///
/// The kernel collapses this to its own I/O error kind; the distinction
/// exists so board code can say what it means.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsError {
    /// The medium failed underneath us.
    Io,
    /// The node was opened without write access.
    ReadOnly,
}

/// One directory listing record.
///
/// This is laid out so the kernel can copy it byte-for-byte into task
/// memory: fixed-size NUL-padded name, no padding bytes, every field valid
/// for any bit pattern.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DirEntry {
    pub name: [u8; MAX_NAME],
    /// Bit 0 set when the entry is itself a directory.
    pub flags: u32,
    pub size: u32,
}

impl DirEntry {
    pub const FLAG_DIRECTORY: u32 = 1 << 0;

    /// Builds an entry from parts, truncating `name` to what fits.
    pub fn new(name: &str, is_directory: bool, size: u32) -> Self {
        let mut buf = [0; MAX_NAME];
        let n = name.len().min(MAX_NAME - 1);
        buf[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self {
            name: buf,
            flags: if is_directory { Self::FLAG_DIRECTORY } else { 0 },
            size,
        }
    }

    /// The entry name with its NUL padding trimmed. Returns an empty string
    /// if the stored bytes are not valid UTF-8.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn is_directory(&self) -> bool {
        self.flags & Self::FLAG_DIRECTORY != 0
    }
}

/// An open file or directory, as the storage medium sees it.
///
/// Directory iteration follows the usual removable-media shape: a directory
/// node yields its children one at a time through `open_next_child`, and
/// `rewind` starts the walk over.
pub trait FsNode: Sized {
    /// Reads from the node's current position, advancing it. Returns the
    /// number of bytes read; zero at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Appends to the node. Only meaningful for nodes opened writable.
    fn write(&mut self, data: &[u8]) -> Result<usize, FsError>;

    /// Current size of the node in bytes.
    fn size(&self) -> u32;

    fn is_directory(&self) -> bool;

    /// Name of the node (final path component).
    fn name(&self) -> &str;

    /// For a directory node, opens the next child in iteration order, or
    /// `None` when the listing is exhausted. For a file node, always `None`.
    fn open_next_child(&mut self) -> Option<Self>;

    /// Restarts directory iteration from the first child.
    fn rewind(&mut self);
}

/// A mounted storage volume.
pub trait Filesystem {
    type Node: FsNode;

    /// Opens `path`. With `write`, the file is created if absent and opened
    /// for appending. Returns `None` if the path does not resolve (or, for
    /// read-only opens, does not exist).
    fn open(&mut self, path: &str, write: bool) -> Option<Self::Node>;

    fn exists(&mut self, path: &str) -> bool;

    /// Removes a file. Returns `false` if nothing was removed.
    fn remove(&mut self, path: &str) -> bool;

    fn mkdir(&mut self, path: &str) -> bool;

    fn rmdir(&mut self, path: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_entry_name_roundtrip() {
        let e = DirEntry::new("README.TXT", false, 123);
        assert_eq!(e.name(), "README.TXT");
        assert!(!e.is_directory());
        assert_eq!(e.size, 123);
    }

    #[test]
    fn dir_entry_truncates_long_names() {
        let long = "x".repeat(200);
        let e = DirEntry::new(&long, true, 0);
        assert_eq!(e.name().len(), MAX_NAME - 1);
        assert!(e.is_directory());
    }
}
