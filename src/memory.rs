//! A simple in-memory filesystem embedding [`crate::lowlevel::FuseLowLevelOps`].
//!
//! This is the demo filesystem the `finesse-demo-server` binary wires up to
//! a [`crate::server::FinesseServer`] (SPEC_FULL.md §2 "Crate layout"),
//! standing in for the excluded "bitbucket" reference filesystem (spec.md
//! §1). Grounded directly on the teacher's own `memory.rs`, with each
//! `Filesystem` trait method translated one-for-one into the matching
//! [`FuseLowLevelOps`] method: the reply-object style (`reply.attr(..)`,
//! `reply.error(..)`) becomes a plain `OpResult<T>` return, since here the
//! adapter (not the kernel) is the caller and wants a value back directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use libc::ENOENT;
use log::debug;

use crate::lowlevel::{DirEntry, EntryOut, FileLock, FuseLowLevelOps, OpResult, OpenOut, StatfsData};
use finesse_abi::{FileAttr, FileType, Ino, SetAttrInput};

const BLOCK_SIZE: u32 = 4096;
const FRSIZE: u32 = BLOCK_SIZE;
const ROOT_INO: Ino = 1;

struct State {
    inodes: HashMap<Ino, FileAttr>,
    name_inode: HashMap<(Ino, String), Ino>,
    data: HashMap<Ino, Vec<u8>>,
    next_ino: Ino,
}

/// A simple in-memory filesystem. All state lives behind one [`Mutex`]
/// because [`FuseLowLevelOps`] takes `&self` (the adapter calls it from
/// whichever dispatcher thread picked up the request; spec.md §5 puts no
/// ordering requirement across clients/slots beyond per-slot FIFO, so a
/// single coarse lock is the simplest correct choice here, matching the
/// teacher's own single-struct, no-internal-concurrency `MemoryFS`).
pub struct MemoryFS {
    max_size: u64,
    state: Mutex<State>,
}

/// Create a new in-memory filesystem.
pub fn new(max_size: u64) -> MemoryFS {
    let mut inodes = HashMap::new();
    inodes.insert(
        ROOT_INO,
        FileAttr {
            ino: ROOT_INO,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            ..Default::default()
        },
    );
    MemoryFS {
        max_size,
        state: Mutex::new(State {
            inodes,
            name_inode: HashMap::new(),
            data: HashMap::new(),
            next_ino: ROOT_INO + 1,
        }),
    }
}

impl FuseLowLevelOps for MemoryFS {
    fn lookup(&self, parent: Ino, name: &str) -> OpResult<EntryOut> {
        let state = self.state.lock().unwrap();
        let ino = *state.name_inode.get(&(parent, name.to_string())).ok_or(ENOENT)?;
        let attr = *state.inodes.get(&ino).ok_or(ENOENT)?;
        Ok(entry_out(attr))
    }

    fn forget(&self, _ino: Ino, _nlookup: u64) {}

    fn getattr(&self, ino: Ino) -> OpResult<FileAttr> {
        let state = self.state.lock().unwrap();
        state.inodes.get(&ino).copied().ok_or(ENOENT)
    }

    fn setattr(&self, ino: Ino, input: &SetAttrInput) -> OpResult<FileAttr> {
        let mut state = self.state.lock().unwrap();
        let attr = state.inodes.get_mut(&ino).ok_or(ENOENT)?;
        if let Some(mode) = input.mode {
            attr.perm = mode as u16;
        }
        if let Some(uid) = input.uid {
            attr.uid = uid;
        }
        if let Some(gid) = input.gid {
            attr.gid = gid;
        }
        if let Some(size) = input.size {
            attr.size = size;
        }
        if let Some(atime) = input.atime {
            attr.atime = atime;
        }
        if let Some(mtime) = input.mtime {
            attr.mtime = mtime;
        }
        if let Some(crtime) = input.crtime {
            attr.crtime = crtime;
        }
        if let Some(flags) = input.flags {
            attr.flags = flags;
        }
        Ok(*attr)
    }

    fn readlink(&self, _ino: Ino) -> OpResult<String> {
        Err(libc::EINVAL)
    }

    fn mknod(&self, parent: Ino, name: &str, mode: u32, _rdev: u32) -> OpResult<EntryOut> {
        self.create_inode(parent, name, mode, FileType::RegularFile)
    }

    fn mkdir(&self, parent: Ino, name: &str, mode: u32) -> OpResult<EntryOut> {
        self.create_inode(parent, name, mode, FileType::Directory)
    }

    fn unlink(&self, parent: Ino, name: &str) -> OpResult<()> {
        let mut state = self.state.lock().unwrap();
        let ino = state.name_inode.remove(&(parent, name.to_string())).ok_or(ENOENT)?;
        state.inodes.remove(&ino);
        state.data.remove(&ino);
        Ok(())
    }

    fn rmdir(&self, parent: Ino, name: &str) -> OpResult<()> {
        self.unlink(parent, name)
    }

    fn symlink(&self, _parent: Ino, _name: &str, _link: &str) -> OpResult<EntryOut> {
        Err(libc::ENOSYS)
    }

    fn rename(&self, old_parent: Ino, old_name: &str, new_parent: Ino, new_name: &str, _flags: u32) -> OpResult<()> {
        let mut state = self.state.lock().unwrap();
        let ino = state
            .name_inode
            .remove(&(old_parent, old_name.to_string()))
            .ok_or(ENOENT)?;
        state.name_inode.insert((new_parent, new_name.to_string()), ino);
        Ok(())
    }

    fn link(&self, ino: Ino, new_parent: Ino, new_name: &str) -> OpResult<EntryOut> {
        let mut state = self.state.lock().unwrap();
        let attr = *state.inodes.get(&ino).ok_or(ENOENT)?;
        state.name_inode.insert((new_parent, new_name.to_string()), ino);
        Ok(entry_out(attr))
    }

    fn open(&self, _ino: Ino, _flags: u32) -> OpResult<OpenOut> {
        Ok(OpenOut { fh: 0, flags: 0 })
    }

    fn read(&self, ino: Ino, _fh: u64, offset: i64, size: u32) -> OpResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let data = state.data.get(&ino).ok_or(ENOENT)?;
        let start = (offset as usize).min(data.len());
        let end = (start + size as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn write(&self, ino: Ino, _fh: u64, offset: i64, data: &[u8], _flags: u32) -> OpResult<u32> {
        debug!("write ino: {}, offset: {}, size: {}", ino, offset, data.len());
        let mut state = self.state.lock().unwrap();
        let max_size = self.max_size;
        let file_data = state.data.get_mut(&ino).ok_or(ENOENT)?;
        let offset = offset as usize;
        let end = offset + data.len();
        if end as u64 > max_size {
            return Err(libc::ENOSPC);
        }
        if end > file_data.len() {
            file_data.resize(end, 0);
        }
        file_data[offset..end].copy_from_slice(data);
        let written = data.len() as u32;
        if let Some(attr) = state.inodes.get_mut(&ino) {
            attr.size = file_data.len() as u64;
        }
        Ok(written)
    }

    fn flush(&self, _ino: Ino, _fh: u64, _lock_owner: u64) -> OpResult<()> {
        Ok(())
    }

    fn release(&self, _ino: Ino, _fh: u64, _flags: u32, _lock_owner: u64, _flush: bool) -> OpResult<()> {
        Ok(())
    }

    fn fsync(&self, _ino: Ino, _fh: u64, _datasync: bool) -> OpResult<()> {
        Ok(())
    }

    fn opendir(&self, _ino: Ino, _flags: u32) -> OpResult<OpenOut> {
        Ok(OpenOut { fh: 0, flags: 0 })
    }

    fn readdir(&self, ino: Ino, _fh: u64, offset: i64) -> OpResult<Vec<DirEntry>> {
        let state = self.state.lock().unwrap();
        if !state.inodes.contains_key(&ino) {
            return Err(ENOENT);
        }
        let entries: Vec<DirEntry> = state
            .name_inode
            .iter()
            .filter(|((parent, _), _)| *parent == ino)
            .enumerate()
            .skip(offset.max(0) as usize)
            .filter_map(|(i, ((_, name), child))| {
                state.inodes.get(child).map(|attr| DirEntry {
                    ino: *child,
                    offset: (i + 1) as i64,
                    kind: attr.kind,
                    name: name.clone(),
                })
            })
            .collect();
        Ok(entries)
    }

    fn releasedir(&self, _ino: Ino, _fh: u64, _flags: u32) -> OpResult<()> {
        Ok(())
    }

    fn fsyncdir(&self, _ino: Ino, _fh: u64, _datasync: bool) -> OpResult<()> {
        Ok(())
    }

    fn setxattr(&self, _ino: Ino, _name: &str, _value: &[u8], _flags: u32) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    fn getxattr(&self, _ino: Ino, _name: &str, _size: u32) -> OpResult<Vec<u8>> {
        Err(libc::ENODATA)
    }

    fn listxattr(&self, _ino: Ino, _size: u32) -> OpResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn removexattr(&self, _ino: Ino, _name: &str) -> OpResult<()> {
        Err(libc::ENODATA)
    }

    fn statfs(&self, _ino: Ino) -> OpResult<StatfsData> {
        let state = self.state.lock().unwrap();
        let blocks = self.max_size / FRSIZE as u64;
        Ok(StatfsData {
            blocks,
            bfree: blocks,
            bavail: blocks,
            files: state.inodes.len() as u64,
            ffree: 1_000_000,
            bsize: BLOCK_SIZE,
            namelen: 255,
            frsize: FRSIZE,
        })
    }

    fn access(&self, _ino: Ino, _mask: u32) -> OpResult<()> {
        Ok(())
    }

    fn create(&self, parent: Ino, name: &str, mode: u32, _flags: u32) -> OpResult<(EntryOut, OpenOut)> {
        let entry = self.create_inode(parent, name, mode, FileType::RegularFile)?;
        Ok((entry, OpenOut { fh: 0, flags: 0 }))
    }

    fn getlk(&self, _ino: Ino, _fh: u64, _owner: u64, lock: FileLock) -> OpResult<FileLock> {
        Ok(lock)
    }

    fn setlk(&self, _ino: Ino, _fh: u64, _owner: u64, _lock: FileLock, _sleep: bool) -> OpResult<()> {
        Ok(())
    }

    fn bmap(&self, _ino: Ino, _blocksize: u32, _idx: u64) -> OpResult<u64> {
        Err(libc::ENOSYS)
    }

    fn ioctl(&self, _ino: Ino, _fh: u64, _cmd: u32, _arg: u64, _flags: u32) -> OpResult<u64> {
        Err(libc::ENOSYS)
    }

    fn poll(&self, _ino: Ino, _fh: u64, _kh: u64) -> OpResult<u32> {
        Err(libc::ENOSYS)
    }

    fn flock(&self, _ino: Ino, _fh: u64, _lock_owner: u64, _operation: i32) -> OpResult<()> {
        Ok(())
    }

    fn fallocate(&self, ino: Ino, _fh: u64, offset: i64, length: i64, _mode: i32) -> OpResult<()> {
        let mut state = self.state.lock().unwrap();
        let file_data = state.data.get_mut(&ino).ok_or(ENOENT)?;
        let end = (offset + length) as usize;
        if end > file_data.len() {
            file_data.resize(end, 0);
        }
        Ok(())
    }

    fn copy_file_range(
        &self,
        ino_in: Ino,
        _fh_in: u64,
        offset_in: i64,
        ino_out: Ino,
        _fh_out: u64,
        offset_out: i64,
        len: u64,
        _flags: u32,
    ) -> OpResult<u64> {
        let mut state = self.state.lock().unwrap();
        let src = state.data.get(&ino_in).ok_or(ENOENT)?.clone();
        let start = (offset_in as usize).min(src.len());
        let end = (start + len as usize).min(src.len());
        let chunk = src[start..end].to_vec();
        let dst = state.data.get_mut(&ino_out).ok_or(ENOENT)?;
        let dst_start = offset_out as usize;
        let dst_end = dst_start + chunk.len();
        if dst_end > dst.len() {
            dst.resize(dst_end, 0);
        }
        dst[dst_start..dst_end].copy_from_slice(&chunk);
        Ok(chunk.len() as u64)
    }

    fn lseek(&self, ino: Ino, _fh: u64, offset: i64, whence: i32) -> OpResult<i64> {
        let state = self.state.lock().unwrap();
        let data = state.data.get(&ino).ok_or(ENOENT)?;
        match whence {
            libc::SEEK_SET => Ok(offset),
            libc::SEEK_CUR => Ok(offset),
            libc::SEEK_END => Ok(data.len() as i64 + offset),
            _ => Err(libc::EINVAL),
        }
    }
}

impl MemoryFS {
    fn create_inode(&self, parent: Ino, name: &str, mode: u32, kind: FileType) -> OpResult<EntryOut> {
        let mut state = self.state.lock().unwrap();
        if !state.inodes.contains_key(&parent) {
            return Err(ENOENT);
        }
        let ino = state.next_ino;
        state.next_ino += 1;
        let attr = FileAttr {
            ino,
            kind,
            perm: mode as u16,
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            ..Default::default()
        };
        state.inodes.insert(ino, attr);
        state.name_inode.insert((parent, name.to_string()), ino);
        state.data.insert(ino, Vec::new());
        Ok(entry_out(attr))
    }
}

fn entry_out(attr: FileAttr) -> EntryOut {
    EntryOut {
        attr,
        generation: 0,
        entry_valid: Duration::new(1, 0),
        attr_valid: Duration::new(1, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_nonexistent_returns_enoent() {
        let fs = new(1 << 20);
        assert_eq!(fs.lookup(ROOT_INO, "missing").unwrap_err(), ENOENT);
    }

    #[test]
    fn create_then_lookup_then_read_write_roundtrip() {
        let fs = new(1 << 20);
        let (entry, open) = fs.create(ROOT_INO, "hello.txt", 0o644, 0).unwrap();
        let ino = entry.attr.ino;
        fs.write(ino, open.fh, 0, b"hello world", 0).unwrap();
        let data = fs.read(ino, open.fh, 0, 32).unwrap();
        assert_eq!(&data, b"hello world");

        let looked_up = fs.lookup(ROOT_INO, "hello.txt").unwrap();
        assert_eq!(looked_up.attr.ino, ino);
    }

    #[test]
    fn readdir_lists_created_entries() {
        let fs = new(1 << 20);
        fs.mkdir(ROOT_INO, "sub", 0o755).unwrap();
        let entries = fs.readdir(ROOT_INO, 0, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "sub");
    }

    #[test]
    fn unlink_removes_entry() {
        let fs = new(1 << 20);
        fs.create(ROOT_INO, "f", 0o644, 0).unwrap();
        fs.unlink(ROOT_INO, "f").unwrap();
        assert_eq!(fs.lookup(ROOT_INO, "f").unwrap_err(), ENOENT);
    }

    #[test]
    fn statfs_reports_nonzero_block_size() {
        let fs = new(1 << 20);
        let stat = fs.statfs(ROOT_INO).unwrap();
        assert_eq!(stat.bsize, BLOCK_SIZE);
    }
}
