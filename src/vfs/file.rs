//! VFS file layer: open-file table, path walk, and the POSIX-ish
//! read/write/seek/stat/unlink operations built on the inode and MINIX
//! layers below.

use bitflags::bitflags;

use crate::error::{Errno, Result};
use crate::vfs::inode::InodeTable;
use crate::vfs::minix::{self, Dinode, Minix, FS_BLOCK_SIZE};

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0;
        const O_WRONLY = 1 << 0;
        const O_RDWR   = 1 << 1;
        const O_CREAT  = 1 << 2;
        const O_TRUNC  = 1 << 3;
        const O_EXCL   = 1 << 4;
    }
}

impl OpenFlags {
    fn readable(self) -> bool {
        !self.contains(OpenFlags::O_WRONLY) || self.contains(OpenFlags::O_RDWR)
    }

    fn writable(self) -> bool {
        self.intersects(OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub uid: u16,
    pub gid: u8,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u16,
    pub mode: u16,
    pub nlink: u8,
    pub uid: u16,
    pub gid: u8,
    pub size: u32,
    pub blksize: u32,
    pub blocks: u32,
}

/// `has_permissions`: the bits of `mode` granted to `identity`,
/// ANDed with `mask`. Superusers get everything; otherwise the identity
/// class (owner/group/other) selects which octal triplet applies.
pub fn has_permissions(mode: u16, inode_uid: u16, inode_gid: u8, mask: u16, identity: &Identity) -> u16 {
    if identity.is_superuser {
        return mask & 0o7;
    }
    let bits = if identity.uid == inode_uid {
        (mode >> 6) & 0o7
    } else if identity.gid == inode_gid {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };
    bits & mask
}

const R_OK: u16 = 0o4;
const W_OK: u16 = 0o2;

struct OpenFileEntry {
    oflag: OpenFlags,
    count: u32,
    pos: u64,
    inode_idx: usize,
}

pub struct FileTable {
    entries: Vec<Option<OpenFileEntry>>,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| None).collect(),
        }
    }
}

pub type Fd = usize;

/// Owns the whole VFS server's state: the MINIX engine, the in-memory
/// inode table, and the open-file table. The root inode is pinned at
/// refcount 2 for the lifetime of the mount, per the design's
/// resolution of the "double get on root" liveness hack in the source.
pub struct Vfs {
    pub fs: Minix,
    pub inodes: InodeTable,
    files: FileTable,
    root_idx: usize,
}

impl Vfs {
    pub fn mount(mut fs: Minix, nr_inodes: usize, nr_files: usize) -> Result<Self> {
        let mut inodes = InodeTable::new(nr_inodes);
        let root_idx = inodes.inode_get(&mut fs, minix::ROOT_INODE)?;
        inodes.bump(root_idx); // pin at refcount 2
        Ok(Self {
            fs,
            inodes,
            files: FileTable::new(nr_files),
            root_idx,
        })
    }

    /// Walks `path` (always treated as rooted at `/`; this core never
    /// implements `chdir`) to the inode table index of the final
    /// component's parent directory, returning that index plus the
    /// trailing name to search for there.
    fn walk_to_parent<'a>(&mut self, path: &'a str) -> Result<(usize, &'a str)> {
        let path = path.trim_start_matches('/');
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let name = segments.pop().ok_or(Errno::Einval)?;

        let mut cur = self.root_idx;
        self.inodes.bump(cur);
        for seg in segments {
            if !minix::is_dir(self.inodes.data(cur).mode) {
                self.inodes.inode_put(&mut self.fs, cur)?;
                return Err(Errno::Enoent);
            }
            let off = self.fs.dirent_search(self.inodes.data_mut(cur), seg, false);
            let off = match off {
                Ok(off) => off,
                Err(e) => {
                    self.inodes.inode_put(&mut self.fs, cur)?;
                    return Err(e);
                }
            };
            let block = self.fs.block_map(self.inodes.data_mut(cur), off as usize / FS_BLOCK_SIZE, false)?;
            let buf = self.fs.cache.bread(block)?;
            let blk_off = off as usize % FS_BLOCK_SIZE;
            let ino = u16::from_le_bytes([
                self.fs.cache.get_data(buf)[blk_off],
                self.fs.cache.get_data(buf)[blk_off + 1],
            ]);
            self.fs.cache.brelse(buf)?;
            let next = self.inodes.inode_get(&mut self.fs, ino)?;
            self.inodes.inode_put(&mut self.fs, cur)?;
            cur = next;
        }
        Ok((cur, name))
    }

    fn lookup(&mut self, path: &str) -> Result<usize> {
        if path.trim_start_matches('/').is_empty() {
            self.inodes.bump(self.root_idx);
            return Ok(self.root_idx);
        }
        let (parent, name) = self.walk_to_parent(path)?;
        let off = self.fs.dirent_search(self.inodes.data_mut(parent), name, false);
        let result = match off {
            Ok(off) => {
                let block = self.fs.block_map(self.inodes.data_mut(parent), off as usize / FS_BLOCK_SIZE, false)?;
                let buf = self.fs.cache.bread(block)?;
                let blk_off = off as usize % FS_BLOCK_SIZE;
                let ino = u16::from_le_bytes([
                    self.fs.cache.get_data(buf)[blk_off],
                    self.fs.cache.get_data(buf)[blk_off + 1],
                ]);
                self.fs.cache.brelse(buf)?;
                self.inodes.inode_get(&mut self.fs, ino)
            }
            Err(e) => Err(e),
        };
        self.inodes.inode_put(&mut self.fs, parent)?;
        result
    }

    /// `open`.
    pub fn open(&mut self, identity: &Identity, path: &str, oflag: OpenFlags, mode: u16, now: u32) -> Result<Fd> {
        let existing = self.lookup(path);
        let inode_idx = match existing {
            Ok(idx) => {
                if oflag.contains(OpenFlags::O_CREAT) && oflag.contains(OpenFlags::O_EXCL) {
                    self.inodes.inode_put(&mut self.fs, idx)?;
                    return Err(Errno::Eexist);
                }
                idx
            }
            Err(Errno::Enoent) if oflag.contains(OpenFlags::O_CREAT) => {
                let (parent, name) = self.walk_to_parent(path)?;
                let new_mode = minix::S_IFREG | mode;
                let idx = self
                    .inodes
                    .inode_alloc(&mut self.fs, new_mode, identity.uid, identity.gid);
                let idx = match idx {
                    Ok(idx) => idx,
                    Err(e) => {
                        self.inodes.inode_put(&mut self.fs, parent)?;
                        return Err(e);
                    }
                };
                let ino = self.inodes.num(idx);
                let add = self.fs.dirent_add(self.inodes.data_mut(parent), name, ino);
                self.inodes.inode_put(&mut self.fs, parent)?;
                add?;
                idx
            }
            Err(e) => return Err(e),
        };

        let data = *self.inodes.data(inode_idx);
        if minix::is_dir(data.mode) && oflag.writable() {
            self.inodes.inode_put(&mut self.fs, inode_idx)?;
            return Err(Errno::Eacces);
        }
        let want_read = oflag.readable();
        let want_write = oflag.writable();
        if want_read && has_permissions(data.mode, data.uid, data.gid, R_OK, identity) == 0 {
            self.inodes.inode_put(&mut self.fs, inode_idx)?;
            return Err(Errno::Eacces);
        }
        if want_write && has_permissions(data.mode, data.uid, data.gid, W_OK, identity) == 0 {
            self.inodes.inode_put(&mut self.fs, inode_idx)?;
            return Err(Errno::Eacces);
        }

        if oflag.contains(OpenFlags::O_TRUNC) && want_write && minix::is_reg(data.mode) {
            self.fs.free_all_zones(self.inodes.data_mut(inode_idx))?;
        }
        self.inodes.inode_touch(inode_idx, now);

        let fd = self.files.entries.iter().position(Option::is_none).ok_or(Errno::Enfile)?;
        self.files.entries[fd] = Some(OpenFileEntry {
            oflag,
            count: 1,
            pos: 0,
            inode_idx,
        });
        Ok(fd)
    }

    fn entry(&self, fd: Fd) -> Result<&OpenFileEntry> {
        self.files.entries.get(fd).and_then(Option::as_ref).ok_or(Errno::Ebadf)
    }

    /// `close`.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let inode_idx = self.entry(fd)?.inode_idx;
        self.files.entries[fd] = None;
        self.inodes.inode_put(&mut self.fs, inode_idx)
    }

    /// `read`: page-by-page through `block_map`/`bread`, copying
    /// `min(remaining, BLOCK_SIZE - offset % BLOCK_SIZE)` bytes at a
    /// time, stopping at EOF.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let entry = self.entry(fd)?;
        if !entry.oflag.readable() {
            return Err(Errno::Eacces);
        }
        let inode_idx = entry.inode_idx;
        let mut pos = entry.pos;
        let size = self.inodes.data(inode_idx).size as u64;

        let mut written = 0usize;
        while written < buf.len() && pos < size {
            let block_index = (pos / FS_BLOCK_SIZE as u64) as usize;
            let in_block = (pos % FS_BLOCK_SIZE as u64) as usize;
            let chunk = (FS_BLOCK_SIZE - in_block)
                .min(buf.len() - written)
                .min((size - pos) as usize);
            let block = self.fs.block_map(self.inodes.data_mut(inode_idx), block_index, false)?;
            let bh = self.fs.cache.bread(block)?;
            buf[written..written + chunk].copy_from_slice(&self.fs.cache.get_data(bh)[in_block..in_block + chunk]);
            self.fs.cache.brelse(bh)?;
            written += chunk;
            pos += chunk as u64;
        }
        if let Some(entry) = self.files.entries[fd].as_mut() {
            entry.pos = pos;
        }
        Ok(written)
    }

    /// `write`: same page-by-page discipline, growing the inode's
    /// `size` past the current end of file.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let entry = self.entry(fd)?;
        if !entry.oflag.writable() {
            return Err(Errno::Eacces);
        }
        let inode_idx = entry.inode_idx;
        let mut pos = entry.pos;

        let mut read = 0usize;
        while read < buf.len() {
            let block_index = (pos / FS_BLOCK_SIZE as u64) as usize;
            let in_block = (pos % FS_BLOCK_SIZE as u64) as usize;
            let chunk = (FS_BLOCK_SIZE - in_block).min(buf.len() - read);
            let block = self.fs.block_map(self.inodes.data_mut(inode_idx), block_index, true)?;
            let bh = self.fs.cache.bread(block)?;
            self.fs.cache.get_data_mut(bh)[in_block..in_block + chunk].copy_from_slice(&buf[read..read + chunk]);
            self.fs.cache.set_dirty(bh);
            self.fs.cache.bwrite(bh)?;
            read += chunk;
            pos += chunk as u64;
        }
        if pos > self.inodes.data(inode_idx).size as u64 {
            self.inodes.data_mut(inode_idx).size = pos as u32;
        }
        if let Some(entry) = self.files.entries[fd].as_mut() {
            entry.pos = pos;
        }
        self.inodes.inode_write(&mut self.fs, inode_idx)?;
        Ok(read)
    }

    /// `lseek`: rejects negative results and FIFO inodes.
    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let entry_inode = self.entry(fd)?.inode_idx;
        if minix::is_fifo(self.inodes.data(entry_inode).mode) {
            return Err(Errno::Espipe);
        }
        let entry = self.entry(fd)?;
        let base: i64 = match whence {
            Whence::Set => 0,
            Whence::Cur => entry.pos as i64,
            Whence::End => self.inodes.data(entry_inode).size as i64,
        };
        let new_pos = base + offset;
        if new_pos < 0 {
            return Err(Errno::Einval);
        }
        if let Some(entry) = self.files.entries[fd].as_mut() {
            entry.pos = new_pos as u64;
        }
        Ok(new_pos as u64)
    }

    /// `stat`.
    pub fn stat(&mut self, path: &str) -> Result<Stat> {
        let idx = self.lookup(path)?;
        let ino = self.inodes.num(idx);
        let blocks = self.fs.file_block_count(self.inodes.data(idx));
        let data = *self.inodes.data(idx);
        self.inodes.inode_put(&mut self.fs, idx)?;
        let blocks = blocks?;
        Ok(Stat {
            ino,
            mode: data.mode,
            nlink: data.nlinks,
            uid: data.uid,
            gid: data.gid,
            size: data.size,
            blksize: FS_BLOCK_SIZE as u32,
            blocks,
        })
    }

    /// `unlink`: refuses the pinned root, requires superuser plus
    /// emptiness for directories, otherwise removes the dirent and drops
    /// the target's link count.
    pub fn unlink(&mut self, identity: &Identity, path: &str) -> Result<()> {
        if path.trim_start_matches('/').is_empty() {
            return Err(Errno::Ebusy);
        }
        let (parent, name) = self.walk_to_parent(path)?;
        let target = self.lookup(path);
        let target_idx = match target {
            Ok(idx) => idx,
            Err(e) => {
                self.inodes.inode_put(&mut self.fs, parent)?;
                return Err(e);
            }
        };
        if target_idx == self.root_idx {
            self.inodes.inode_put(&mut self.fs, parent)?;
            self.inodes.inode_put(&mut self.fs, target_idx)?;
            return Err(Errno::Ebusy);
        }
        if minix::is_dir(self.inodes.data(target_idx).mode) && !identity.is_superuser {
            self.inodes.inode_put(&mut self.fs, parent)?;
            self.inodes.inode_put(&mut self.fs, target_idx)?;
            return Err(Errno::Eacces);
        }
        let result = self.fs.dirent_remove(self.inodes.data_mut(parent), name);
        self.inodes.inode_put(&mut self.fs, parent)?;
        if result.is_ok() {
            let target_data = self.inodes.data_mut(target_idx);
            target_data.nlinks = target_data.nlinks.saturating_sub(1);
        }
        self.inodes.inode_put(&mut self.fs, target_idx)?;
        result.map(|_| ())
    }

    pub fn dinode_of_fd(&self, fd: Fd) -> Result<Dinode> {
        Ok(*self.inodes.data(self.entry(fd)?.inode_idx))
    }

    /// `link`: adds a second directory entry pointing at an
    /// existing inode's number and bumps its on-disk link count.
    /// Directories may not be hard-linked.
    pub fn link(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let target_idx = self.lookup(old_path)?;
        if minix::is_dir(self.inodes.data(target_idx).mode) {
            self.inodes.inode_put(&mut self.fs, target_idx)?;
            return Err(Errno::Eacces);
        }
        let (parent, name) = match self.walk_to_parent(new_path) {
            Ok(v) => v,
            Err(e) => {
                self.inodes.inode_put(&mut self.fs, target_idx)?;
                return Err(e);
            }
        };
        let ino = self.inodes.num(target_idx);
        let add = self.fs.dirent_add(self.inodes.data_mut(parent), name, ino);
        self.inodes.inode_put(&mut self.fs, parent)?;
        if add.is_ok() {
            self.inodes.data_mut(target_idx).nlinks += 1;
            self.inodes.inode_write(&mut self.fs, target_idx)?;
        }
        self.inodes.inode_put(&mut self.fs, target_idx)?;
        add.map(|_| ())
    }

    /// `truncate`: the path-addressed counterpart of `O_TRUNC`.
    /// Only shrink-to-zero and grow-in-place (a no-op on the zone list,
    /// since blocks are allocated lazily on write) are supported; an
    /// arbitrary partial shrink would need zone-by-zone freeing this core
    /// doesn't implement.
    pub fn truncate(&mut self, path: &str, length: u32) -> Result<()> {
        let idx = self.lookup(path)?;
        let is_reg = minix::is_reg(self.inodes.data(idx).mode);
        if !is_reg {
            self.inodes.inode_put(&mut self.fs, idx)?;
            return Err(Errno::Eacces);
        }
        let result = if length == 0 {
            self.fs.free_all_zones(self.inodes.data_mut(idx))
        } else if length >= self.inodes.data(idx).size {
            self.inodes.data_mut(idx).size = length;
            Ok(())
        } else {
            Err(Errno::Enotsup)
        };
        if result.is_ok() {
            self.inodes.inode_write(&mut self.fs, idx)?;
        }
        self.inodes.inode_put(&mut self.fs, idx)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Vfs {
        let fs = Minix::mkfs(2 * 1024 * 1024, 128, 32, 0, 0).unwrap();
        Vfs::mount(fs, 32, 16).unwrap()
    }

    fn root_identity() -> Identity {
        Identity {
            uid: 0,
            gid: 0,
            is_superuser: true,
        }
    }

    #[test]
    fn stat_of_disk_block_device() {
        // Scenario 4.
        let mut vfs = setup();
        let st = vfs.stat("/disk").unwrap();
        assert!(minix::is_blk(st.mode));
        assert_eq!(st.blksize, FS_BLOCK_SIZE as u32);
        assert_eq!(st.size, 2 * 1024 * 1024);
    }

    #[test]
    fn create_write_read_unlink_round_trip() {
        // Scenario 5.
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o600, 0)
            .unwrap();
        let payload = [9u8; FS_BLOCK_SIZE];
        assert_eq!(vfs.write(fd, &payload).unwrap(), FS_BLOCK_SIZE);
        vfs.lseek(fd, 0, Whence::Set).unwrap();
        let mut buf = [0u8; FS_BLOCK_SIZE];
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), FS_BLOCK_SIZE);
        assert_eq!(buf, payload);
        vfs.close(fd).unwrap();
        vfs.unlink(&id, "/f").unwrap();
        assert_eq!(
            vfs.open(&id, "/f", OpenFlags::O_RDONLY, 0, 0),
            Err(Errno::Enoent)
        );
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/g", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o600, 0)
            .unwrap();
        vfs.write(fd, &[1, 2, 3]).unwrap();
        vfs.lseek(fd, 100, Whence::Set).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), 0);
    }

    #[test]
    fn lseek_rejects_negative_result() {
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/h", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o600, 0)
            .unwrap();
        assert_eq!(vfs.lseek(fd, -1, Whence::Set), Err(Errno::Einval));
    }

    #[test]
    fn unlink_refuses_root() {
        let mut vfs = setup();
        let id = root_identity();
        assert_eq!(vfs.unlink(&id, "/"), Err(Errno::Ebusy));
    }

    #[test]
    fn open_without_o_creat_on_missing_path_is_enoent() {
        let mut vfs = setup();
        let id = root_identity();
        assert_eq!(vfs.open(&id, "/nope", OpenFlags::O_RDONLY, 0, 0), Err(Errno::Enoent));
    }

    #[test]
    fn o_excl_rejects_existing_file() {
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/dup", OpenFlags::O_CREAT | OpenFlags::O_RDWR, 0o600, 0)
            .unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(
            vfs.open(&id, "/dup", OpenFlags::O_CREAT | OpenFlags::O_EXCL, 0o600, 0),
            Err(Errno::Eexist)
        );
    }

    #[test]
    fn non_owner_without_read_bit_is_denied() {
        let mut vfs = setup();
        let owner = Identity {
            uid: 1,
            gid: 1,
            is_superuser: false,
        };
        let fd = vfs
            .open(&owner, "/secret", OpenFlags::O_CREAT | OpenFlags::O_WRONLY, 0o200, 0)
            .unwrap();
        vfs.close(fd).unwrap();
        let stranger = Identity {
            uid: 2,
            gid: 2,
            is_superuser: false,
        };
        assert_eq!(
            vfs.open(&stranger, "/secret", OpenFlags::O_RDONLY, 0, 0),
            Err(Errno::Eacces)
        );
    }

    #[test]
    fn link_creates_second_name_sharing_inode() {
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/orig", OpenFlags::O_CREAT | OpenFlags::O_RDWR, 0o600, 0)
            .unwrap();
        vfs.write(fd, b"hi").unwrap();
        vfs.close(fd).unwrap();
        vfs.link("/orig", "/alias").unwrap();
        let fd2 = vfs.open(&id, "/alias", OpenFlags::O_RDONLY, 0, 0).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(vfs.read(fd2, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
        vfs.close(fd2).unwrap();
        vfs.unlink(&id, "/orig").unwrap();
        let fd3 = vfs.open(&id, "/alias", OpenFlags::O_RDONLY, 0, 0).unwrap();
        vfs.close(fd3).unwrap();
    }

    #[test]
    fn truncate_to_zero_frees_zones() {
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/t", OpenFlags::O_CREAT | OpenFlags::O_RDWR, 0o600, 0)
            .unwrap();
        vfs.write(fd, &[5u8; FS_BLOCK_SIZE]).unwrap();
        vfs.close(fd).unwrap();
        vfs.truncate("/t", 0).unwrap();
        let st = vfs.stat("/t").unwrap();
        assert_eq!(st.size, 0);
    }

    #[test]
    fn truncate_partial_shrink_is_unsupported() {
        let mut vfs = setup();
        let id = root_identity();
        let fd = vfs
            .open(&id, "/u", OpenFlags::O_CREAT | OpenFlags::O_RDWR, 0o600, 0)
            .unwrap();
        vfs.write(fd, &[5u8; FS_BLOCK_SIZE]).unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(vfs.truncate("/u", 10), Err(Errno::Enotsup));
    }
}
