// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A RAM-backed filesystem with removable-media semantics: flat string
//! paths, append-on-write files, and snapshot directory iteration.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use drv_sd_api::{Filesystem, FsError, FsNode};

type Bytes = Rc<RefCell<Vec<u8>>>;

pub struct RamDisk {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
}

impl RamDisk {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            files: BTreeMap::new(),
            dirs,
        }
    }

    /// Pre-populates a file, for test setup.
    pub fn preload(&mut self, path: &str, data: &[u8]) {
        self.files.insert(
            normalize(path),
            Rc::new(RefCell::new(data.to_vec())),
        );
    }

    /// Direct view of a file's contents, for test assertions.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .get(&normalize(path))
            .map(|d| d.borrow().clone())
    }

    fn children_of(&self, dir: &str) -> Vec<Child> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        let direct = |path: &str| {
            path.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };

        let mut children = Vec::new();
        for d in &self.dirs {
            if let Some(name) = direct(d) {
                children.push(Child {
                    name,
                    kind: ChildKind::Dir,
                });
            }
        }
        for (path, data) in &self.files {
            if let Some(name) = direct(path) {
                children.push(Child {
                    name,
                    kind: ChildKind::File(data.clone()),
                });
            }
        }
        children
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    let mut p = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or("").to_string()
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

#[derive(Clone)]
struct Child {
    name: String,
    kind: ChildKind,
}

#[derive(Clone)]
enum ChildKind {
    Dir,
    File(Bytes),
}

impl Filesystem for RamDisk {
    type Node = RamNode;

    fn open(&mut self, path: &str, write: bool) -> Option<RamNode> {
        let p = normalize(path);
        if self.dirs.contains(&p) {
            let name = if p == "/" {
                "/".to_string()
            } else {
                basename(&p)
            };
            return Some(RamNode {
                name,
                kind: NodeKind::Dir {
                    children: self.children_of(&p),
                    cursor: 0,
                },
            });
        }
        let data = match self.files.get(&p) {
            Some(d) => d.clone(),
            None if write => {
                // Writable opens create, the way removable-media stacks
                // usually do.
                if !self.dirs.contains(&parent(&p)) {
                    return None;
                }
                let d: Bytes = Rc::new(RefCell::new(Vec::new()));
                self.files.insert(p.clone(), d.clone());
                d
            }
            None => return None,
        };
        Some(RamNode {
            name: basename(&p),
            kind: NodeKind::File {
                data,
                pos: 0,
                writable: write,
            },
        })
    }

    fn exists(&mut self, path: &str) -> bool {
        let p = normalize(path);
        self.files.contains_key(&p) || self.dirs.contains(&p)
    }

    fn remove(&mut self, path: &str) -> bool {
        self.files.remove(&normalize(path)).is_some()
    }

    fn mkdir(&mut self, path: &str) -> bool {
        let p = normalize(path);
        if self.exists(&p) || !self.dirs.contains(&parent(&p)) {
            return false;
        }
        self.dirs.insert(p)
    }

    fn rmdir(&mut self, path: &str) -> bool {
        let p = normalize(path);
        if p == "/" || !self.dirs.contains(&p) {
            return false;
        }
        if !self.children_of(&p).is_empty() {
            return false;
        }
        self.dirs.remove(&p)
    }
}

pub struct RamNode {
    name: String,
    kind: NodeKind,
}

enum NodeKind {
    File {
        data: Bytes,
        pos: usize,
        writable: bool,
    },
    Dir {
        children: Vec<Child>,
        cursor: usize,
    },
}

impl FsNode for RamNode {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        match &mut self.kind {
            NodeKind::File { data, pos, .. } => {
                let data = data.borrow();
                let n = buf.len().min(data.len().saturating_sub(*pos));
                buf[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            NodeKind::Dir { .. } => Err(FsError::Io),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, FsError> {
        match &mut self.kind {
            NodeKind::File { data, writable, .. } => {
                if !*writable {
                    return Err(FsError::ReadOnly);
                }
                data.borrow_mut().extend_from_slice(bytes);
                Ok(bytes.len())
            }
            NodeKind::Dir { .. } => Err(FsError::Io),
        }
    }

    fn size(&self) -> u32 {
        match &self.kind {
            NodeKind::File { data, .. } => data.borrow().len() as u32,
            NodeKind::Dir { .. } => 0,
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn open_next_child(&mut self) -> Option<Self> {
        match &mut self.kind {
            NodeKind::Dir { children, cursor } => {
                let child = children.get(*cursor)?.clone();
                *cursor += 1;
                Some(match child.kind {
                    ChildKind::Dir => RamNode {
                        name: child.name,
                        // Children of children are not needed for a
                        // listing; a fresh open gets the real thing.
                        kind: NodeKind::Dir {
                            children: Vec::new(),
                            cursor: 0,
                        },
                    },
                    ChildKind::File(data) => RamNode {
                        name: child.name,
                        kind: NodeKind::File {
                            data,
                            pos: 0,
                            writable: false,
                        },
                    },
                })
            }
            NodeKind::File { .. } => None,
        }
    }

    fn rewind(&mut self) {
        if let NodeKind::Dir { cursor, .. } = &mut self.kind {
            *cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let mut disk = RamDisk::new();
        {
            let mut f = disk
                .open("/log.txt", true)
                .expect("writable open creates");
            f.write(b"hello").expect("writable");
            f.write(b" world").expect("appends");
        }
        let mut f = disk.open("/log.txt", false).expect("file exists now");
        assert_eq!(f.size(), 11);
        let mut buf = [0; 32];
        let n = f.read(&mut buf).expect("readable");
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(f.read(&mut buf).expect("at eof"), 0);
    }

    #[test]
    fn read_only_open_does_not_create() {
        let mut disk = RamDisk::new();
        assert!(disk.open("/nope", false).is_none());
        assert!(!disk.exists("/nope"));
    }

    #[test]
    fn directory_listing_and_rewind() {
        let mut disk = RamDisk::new();
        assert!(disk.mkdir("/data"));
        disk.preload("/data/a.txt", b"aa");
        disk.preload("/data/b.txt", b"bbbb");

        let mut dir = disk.open("/data", false).expect("dir opens");
        assert!(dir.is_directory());

        let mut names = Vec::new();
        while let Some(child) = dir.open_next_child() {
            names.push((child.name().to_string(), child.size()));
        }
        assert_eq!(
            names,
            vec![("a.txt".to_string(), 2), ("b.txt".to_string(), 4)]
        );

        dir.rewind();
        assert!(dir.open_next_child().is_some());
    }

    #[test]
    fn rmdir_refuses_nonempty() {
        let mut disk = RamDisk::new();
        assert!(disk.mkdir("/d"));
        disk.preload("/d/x", b"1");
        assert!(!disk.rmdir("/d"));
        assert!(disk.remove("/d/x"));
        assert!(disk.rmdir("/d"));
    }

    #[test]
    fn mkdir_needs_a_parent() {
        let mut disk = RamDisk::new();
        assert!(!disk.mkdir("/a/b"));
        assert!(disk.mkdir("/a"));
        assert!(disk.mkdir("/a/b"));
    }
}
