//! MINIX on-disk layout: superblock, inode, directory entry, and the
//! allocators and directory primitives built over them.
//!
//! Structures are cast directly to and from their on-disk byte
//! representation with `zerocopy`, the same safe byte-cast the on-disk
//! `Dirent` uses elsewhere for `Inode::read_kernel`/`write_kernel`; the
//! byte layout itself (field order, widths, `MAGIC`) stays bit-exact to
//! the classic MINIX on-disk format.

use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes};

use crate::config::FS_BLOCK_SIZE;
use crate::error::{Errno, Result};
use crate::vfs::bcache::{BlockCache, Disk};

pub const MAGIC: u16 = 0x137f;
pub const NAME_MAX: usize = 14;
pub const NULL_BLOCK: u16 = 0;
pub const NULL_INODE: u16 = 0;
pub const ROOT_INODE: u16 = 1;
pub const NDIRECT: usize = 7;
pub const PTRS_PER_BLOCK: usize = FS_BLOCK_SIZE / 2; // 16-bit zone pointers
pub const DIRENT_SIZE: usize = 16;
pub const DINODE_SIZE: usize = 32;

pub const S_IFMT: u16 = 0xF000;
pub const S_IFBLK: u16 = 0x6000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFIFO: u16 = 0x1000;

pub const S_IRUSR: u16 = 0o400;
pub const S_IWUSR: u16 = 0o200;
pub const S_IXUSR: u16 = 0o100;
pub const S_IRGRP: u16 = 0o040;
pub const S_IWGRP: u16 = 0o020;
pub const S_IXGRP: u16 = 0o010;
pub const S_IROTH: u16 = 0o004;
pub const S_IWOTH: u16 = 0o002;
pub const S_IXOTH: u16 = 0o001;

pub fn is_dir(mode: u16) -> bool {
    mode & S_IFMT == S_IFDIR
}

pub fn is_blk(mode: u16) -> bool {
    mode & S_IFMT == S_IFBLK
}

pub fn is_reg(mode: u16) -> bool {
    mode & S_IFMT == S_IFREG
}

pub fn is_fifo(mode: u16) -> bool {
    mode & S_IFMT == S_IFIFO
}

// `repr(C)` because it's a struct for the on-disk representation, which
// must follow C (= machine) layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Superblock {
    pub ninodes: u16,
    pub nblocks: u16,
    pub imap_nblocks: u16,
    pub bmap_nblocks: u16,
    pub first_data_block: u16,
    pub unused: u16,
    pub max_size: u32,
    pub magic: u16,
    _pad: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Dinode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub time: u32,
    pub gid: u8,
    pub nlinks: u8,
    pub zones: [u16; 9],
}

impl Dinode {
    pub fn blank(mode: u16, uid: u16, gid: u8) -> Self {
        Self {
            mode,
            uid,
            size: 0,
            time: 0,
            gid,
            nlinks: 1,
            zones: [0; 9],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
struct RawDirent {
    ino: u16,
    name: [u8; NAME_MAX],
}

static_assertions::const_assert_eq!(DINODE_SIZE, size_of::<Dinode>());
static_assertions::const_assert_eq!(DIRENT_SIZE, size_of::<RawDirent>());

#[derive(Debug, Clone)]
pub struct Dirent {
    pub ino: u16,
    pub name: String,
}

fn decode_dirent(b: &[u8]) -> Dirent {
    let raw = RawDirent::read_from(b).expect("dirent slice is DIRENT_SIZE bytes");
    let len = raw.name.iter().position(|&c| c == 0).unwrap_or(NAME_MAX);
    Dirent {
        ino: raw.ino,
        name: String::from_utf8_lossy(&raw.name[..len]).into_owned(),
    }
}

fn encode_dirent(out: &mut [u8], ino: u16, name: &str) {
    let mut raw = RawDirent { ino, name: [0u8; NAME_MAX] };
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_MAX);
    raw.name[..n].copy_from_slice(&bytes[..n]);
    out.copy_from_slice(raw.as_bytes());
}

fn read_ptrs(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
}

fn write_ptrs(data: &mut [u8], ptrs: &[u16]) {
    for (i, p) in ptrs.iter().enumerate() {
        data[i * 2..i * 2 + 2].copy_from_slice(&p.to_le_bytes());
    }
}

/// The MINIX engine: superblock, in-memory allocator bitmaps, and the
/// block cache the on-disk structures are read through.
///
/// The imap/zmap bitmaps are not written back to their reserved disk
/// blocks after `mkfs`: the core never tears down and remounts a file
/// system within one process lifetime (persistence across restarts is a
/// Non-goal), so the in-memory `Bitmap` is the single source of truth for
/// the run.
pub struct Minix {
    pub sb: Superblock,
    imap: crate::bitmap::Bitmap,
    zmap: crate::bitmap::Bitmap,
    pub cache: BlockCache,
}

fn per_inode_block() -> usize {
    FS_BLOCK_SIZE / DINODE_SIZE
}

impl Minix {
    /// `mkfs`: formats a fresh RAM disk, allocates the root
    /// directory with `.` and `..` self-references, and registers a
    /// block-device inode for the raw disk itself.
    pub fn mkfs(disk_size: usize, ninodes: usize, nr_buffers: usize, uid: u16, gid: u8) -> Result<Self> {
        let nblocks_total = disk_size / FS_BLOCK_SIZE;
        let imap_nblocks = ninodes.div_ceil(FS_BLOCK_SIZE * 8);
        // zmap covers only the data zone, sized once first_data_block is known;
        // bootstrap with a conservative estimate then shrink to fit.
        let inode_nblocks = (ninodes * DINODE_SIZE).div_ceil(FS_BLOCK_SIZE);
        let prelude_estimate = 2 + imap_nblocks + inode_nblocks;
        let bmap_nblocks = (nblocks_total.saturating_sub(prelude_estimate)).div_ceil(FS_BLOCK_SIZE * 8).max(1);
        let first_data_block = (2 + imap_nblocks + bmap_nblocks + inode_nblocks) as u16;
        let nblocks = nblocks_total as u16;

        let sb = Superblock {
            ninodes: ninodes as u16,
            nblocks,
            imap_nblocks: imap_nblocks as u16,
            bmap_nblocks: bmap_nblocks as u16,
            first_data_block,
            unused: 0,
            max_size: (NDIRECT + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK) as u32 * FS_BLOCK_SIZE as u32,
            magic: MAGIC,
            _pad: 0,
        };

        let data_zones = nblocks_total.saturating_sub(first_data_block as usize);
        let mut imap = crate::bitmap::Bitmap::new(ninodes);
        let mut zmap = crate::bitmap::Bitmap::new(data_zones.max(1));
        imap.set(NULL_INODE as usize); // inode 0 is never handed out

        let cache = BlockCache::new(Disk::new(disk_size), nr_buffers);
        let mut fs = Self { sb, imap, zmap, cache };

        // Write the superblock (block 1).
        fs.write_struct(1, 0, &sb)?;

        // Root directory inode.
        let root_mode = S_IFDIR | S_IRUSR | S_IWUSR | S_IXUSR | S_IRGRP | S_IXGRP | S_IROTH | S_IXOTH;
        let root_ino = fs.inode_alloc(root_mode, uid, gid)?;
        assert_eq!(root_ino, ROOT_INODE);
        let mut root = fs.read_dinode(root_ino)?;
        fs.dirent_add(&mut root, ".", root_ino)?;
        fs.dirent_add(&mut root, "..", root_ino)?;
        fs.write_dinode(root_ino, &root)?;

        // Block-device inode representing the raw disk, per scenario 4.
        let disk_mode = S_IFBLK | S_IRUSR | S_IWUSR;
        let disk_ino = fs.inode_alloc(disk_mode, uid, gid)?;
        let mut disk_inode = fs.read_dinode(disk_ino)?;
        disk_inode.size = disk_size as u32;
        fs.write_dinode(disk_ino, &disk_inode)?;
        let mut root = fs.read_dinode(root_ino)?;
        fs.dirent_add(&mut root, "disk", disk_ino)?;
        fs.write_dinode(root_ino, &root)?;

        Ok(fs)
    }

    pub fn read_dinode(&mut self, num: u16) -> Result<Dinode> {
        let (block, off) = self.dinode_location(num);
        self.read_struct(block, off)
    }

    pub fn write_dinode(&mut self, num: u16, dinode: &Dinode) -> Result<()> {
        let (block, off) = self.dinode_location(num);
        self.write_struct(block, off, dinode)
    }

    /// Reads a `T` cast directly from the bytes at `off` within `block`,
    /// the safe byte-cast counterpart of `Inode::read_kernel`.
    fn read_struct<T: AsBytes + FromBytes>(&mut self, block: u32, off: usize) -> Result<T> {
        let buf = self.cache.bread(block)?;
        let val = T::read_from(&self.cache.get_data(buf)[off..off + size_of::<T>()]).ok_or(Errno::Efault)?;
        self.cache.brelse(buf)?;
        Ok(val)
    }

    /// Writes `val`'s bytes at `off` within `block`, the safe byte-cast
    /// counterpart of `Inode::write_kernel`.
    fn write_struct<T: AsBytes>(&mut self, block: u32, off: usize, val: &T) -> Result<()> {
        let buf = self.cache.bread(block)?;
        self.cache.get_data_mut(buf)[off..off + size_of::<T>()].copy_from_slice(val.as_bytes());
        self.cache.set_dirty(buf);
        self.cache.bwrite(buf)
    }

    fn dinode_location(&self, num: u16) -> (u32, usize) {
        let per_block = per_inode_block();
        let base = 2 + self.sb.imap_nblocks as usize + self.sb.bmap_nblocks as usize;
        let block = base + num as usize / per_block;
        let off = (num as usize % per_block) * DINODE_SIZE;
        (block as u32, off)
    }

    pub fn inode_alloc(&mut self, mode: u16, uid: u16, gid: u8) -> Result<u16> {
        let bit = self.imap.alloc().ok_or(Errno::Enospc)?;
        let dinode = Dinode::blank(mode, uid, gid);
        self.write_dinode(bit as u16, &dinode)?;
        Ok(bit as u16)
    }

    pub fn inode_free(&mut self, num: u16) {
        if num != NULL_INODE {
            self.imap.clear(num as usize);
        }
    }

    fn block_alloc(&mut self) -> Result<u16> {
        let bit = self.zmap.alloc().ok_or(Errno::Enospc)?;
        Ok(self.sb.first_data_block + bit as u16)
    }

    fn block_free_direct(&mut self, zone: u16) {
        if zone != NULL_BLOCK {
            let bit = (zone - self.sb.first_data_block) as usize;
            if bit < self.zmap.len() {
                self.zmap.clear(bit);
            }
        }
    }

    fn block_free_indirect(&mut self, zone: u16) -> Result<()> {
        if zone == NULL_BLOCK {
            return Ok(());
        }
        let buf = self.cache.bread(zone as u32)?;
        let ptrs = read_ptrs(self.cache.get_data(buf));
        self.cache.brelse(buf)?;
        for p in ptrs {
            self.block_free_direct(p);
        }
        self.block_free_direct(zone);
        Ok(())
    }

    fn block_free_dindirect(&mut self, zone: u16) -> Result<()> {
        if zone == NULL_BLOCK {
            return Ok(());
        }
        let buf = self.cache.bread(zone as u32)?;
        let ptrs = read_ptrs(self.cache.get_data(buf));
        self.cache.brelse(buf)?;
        for p in ptrs {
            self.block_free_indirect(p)?;
        }
        self.block_free_direct(zone);
        Ok(())
    }

    /// Frees every zone (direct, single- and double-indirect) held by
    /// `dip` and resets its size, for `O_TRUNC` and `unlink`.
    pub fn free_all_zones(&mut self, dip: &mut Dinode) -> Result<()> {
        for i in 0..NDIRECT {
            self.block_free_direct(dip.zones[i]);
            dip.zones[i] = NULL_BLOCK;
        }
        self.block_free_indirect(dip.zones[NDIRECT])?;
        dip.zones[NDIRECT] = NULL_BLOCK;
        self.block_free_dindirect(dip.zones[NDIRECT + 1])?;
        dip.zones[NDIRECT + 1] = NULL_BLOCK;
        dip.size = 0;
        Ok(())
    }

    /// `block_map`: translate a logical block index within a
    /// file into an absolute device block, optionally allocating.
    pub fn block_map(&mut self, dip: &mut Dinode, index: usize, create: bool) -> Result<u32> {
        if index < NDIRECT {
            if dip.zones[index] == NULL_BLOCK {
                if !create {
                    return Err(Errno::Einval);
                }
                dip.zones[index] = self.block_alloc()?;
            }
            return Ok(dip.zones[index] as u32);
        }

        let index = index - NDIRECT;
        if index < PTRS_PER_BLOCK {
            return self.block_map_indirect(&mut dip.zones[NDIRECT], index, create);
        }

        let index = index - PTRS_PER_BLOCK;
        if index < PTRS_PER_BLOCK * PTRS_PER_BLOCK {
            let outer_index = index / PTRS_PER_BLOCK;
            let inner_index = index % PTRS_PER_BLOCK;
            if dip.zones[NDIRECT + 1] == NULL_BLOCK {
                if !create {
                    return Err(Errno::Einval);
                }
                dip.zones[NDIRECT + 1] = self.block_alloc()?;
            }
            let outer_zone = dip.zones[NDIRECT + 1];
            let buf = self.cache.bread(outer_zone as u32)?;
            let mut outer_ptrs = read_ptrs(self.cache.get_data(buf));
            self.cache.brelse(buf)?;
            let result = self.block_map_ptr_slot(&mut outer_ptrs, outer_index, inner_index, create)?;
            let buf = self.cache.bread(outer_zone as u32)?;
            write_ptrs(self.cache.get_data_mut(buf), &outer_ptrs);
            self.cache.set_dirty(buf);
            self.cache.bwrite(buf)?;
            return Ok(result);
        }

        Err(Errno::Efbig)
    }

    fn block_map_indirect(&mut self, zone_slot: &mut u16, index: usize, create: bool) -> Result<u32> {
        if *zone_slot == NULL_BLOCK {
            if !create {
                return Err(Errno::Einval);
            }
            *zone_slot = self.block_alloc()?;
        }
        let ptr_block = *zone_slot;
        let buf = self.cache.bread(ptr_block as u32)?;
        let mut ptrs = read_ptrs(self.cache.get_data(buf));
        self.cache.brelse(buf)?;

        if ptrs[index] == NULL_BLOCK {
            if !create {
                return Err(Errno::Einval);
            }
            ptrs[index] = self.block_alloc()?;
            let buf = self.cache.bread(ptr_block as u32)?;
            write_ptrs(self.cache.get_data_mut(buf), &ptrs);
            self.cache.set_dirty(buf);
            self.cache.bwrite(buf)?;
        }
        Ok(ptrs[index] as u32)
    }

    /// Resolves one inner pointer slot, allocating the inner indirect
    /// block if needed; `outer_ptrs` is written back by the caller.
    fn block_map_ptr_slot(
        &mut self,
        outer_ptrs: &mut [u16],
        outer_index: usize,
        inner_index: usize,
        create: bool,
    ) -> Result<u32> {
        if outer_ptrs[outer_index] == NULL_BLOCK {
            if !create {
                return Err(Errno::Einval);
            }
            outer_ptrs[outer_index] = self.block_alloc()?;
        }
        let inner_zone = outer_ptrs[outer_index];
        let buf = self.cache.bread(inner_zone as u32)?;
        let mut inner_ptrs = read_ptrs(self.cache.get_data(buf));
        self.cache.brelse(buf)?;

        if inner_ptrs[inner_index] == NULL_BLOCK {
            if !create {
                return Err(Errno::Einval);
            }
            inner_ptrs[inner_index] = self.block_alloc()?;
            let buf = self.cache.bread(inner_zone as u32)?;
            write_ptrs(self.cache.get_data_mut(buf), &inner_ptrs);
            self.cache.set_dirty(buf);
            self.cache.bwrite(buf)?;
        }
        Ok(inner_ptrs[inner_index] as u32)
    }

    /// `dirent_search`.
    pub fn dirent_search(&mut self, dip: &mut Dinode, name: &str, create: bool) -> Result<u64> {
        let nentries = dip.size as usize / DIRENT_SIZE;
        let mut hole: Option<u64> = None;
        for i in 0..nentries {
            let off = i * DIRENT_SIZE;
            let blk_index = off / FS_BLOCK_SIZE;
            let blk_off = off % FS_BLOCK_SIZE;
            let block = self.block_map(dip, blk_index, false)?;
            let buf = self.cache.bread(block)?;
            let dirent = decode_dirent(&self.cache.get_data(buf)[blk_off..blk_off + DIRENT_SIZE]);
            self.cache.brelse(buf)?;
            if dirent.ino != NULL_INODE {
                if dirent.name == name {
                    if create {
                        return Err(Errno::Eexist);
                    }
                    return Ok(off as u64);
                }
            } else if create && hole.is_none() {
                hole = Some(off as u64);
            }
        }
        if !create {
            return Err(Errno::Enoent);
        }
        match hole {
            Some(off) => Ok(off),
            None => {
                let off = dip.size as u64;
                dip.size += DIRENT_SIZE as u32;
                Ok(off)
            }
        }
    }

    /// `dirent_add`.
    pub fn dirent_add(&mut self, dip: &mut Dinode, name: &str, ino: u16) -> Result<()> {
        let off = self.dirent_search(dip, name, true)?;
        let blk_index = off as usize / FS_BLOCK_SIZE;
        let blk_off = off as usize % FS_BLOCK_SIZE;
        let block = self.block_map(dip, blk_index, true)?;
        let buf = self.cache.bread(block)?;
        encode_dirent(&mut self.cache.get_data_mut(buf)[blk_off..blk_off + DIRENT_SIZE], ino, name);
        self.cache.set_dirty(buf);
        self.cache.bwrite(buf)?;
        dip.nlinks += 1;
        Ok(())
    }

    /// `dirent_remove`: refuses `.` and non-empty directories, zeroes the
    /// slot, and returns the removed entry's inode number. The target
    /// inode's own link count is the caller's responsibility to update on
    /// its in-memory copy, so a later `inode_put` observes it.
    pub fn dirent_remove(&mut self, dip: &mut Dinode, name: &str) -> Result<u16> {
        if name == "." {
            return Err(Errno::Eacces);
        }
        let off = self.dirent_search(dip, name, false)?;
        let blk_index = off as usize / FS_BLOCK_SIZE;
        let blk_off = off as usize % FS_BLOCK_SIZE;
        let block = self.block_map(dip, blk_index, false)?;
        let buf = self.cache.bread(block)?;
        let dirent = decode_dirent(&self.cache.get_data(buf)[blk_off..blk_off + DIRENT_SIZE]);
        let target_ino = dirent.ino;
        self.cache.brelse(buf)?;

        let target = self.read_dinode(target_ino)?;
        if is_dir(target.mode) && target.size as usize / DIRENT_SIZE > 2 {
            return Err(Errno::Ebusy);
        }

        let buf = self.cache.bread(block)?;
        encode_dirent(&mut self.cache.get_data_mut(buf)[blk_off..blk_off + DIRENT_SIZE], 0, "");
        self.cache.set_dirty(buf);
        self.cache.bwrite(buf)?;

        dip.nlinks = dip.nlinks.saturating_sub(1);
        Ok(target_ino)
    }

    /// Lists the non-hole entries of a directory inode, for readdir-style
    /// callers and for the empty-directory check above.
    pub fn dirent_list(&mut self, dip: &mut Dinode) -> Result<Vec<Dirent>> {
        let nentries = dip.size as usize / DIRENT_SIZE;
        let mut out = Vec::new();
        for i in 0..nentries {
            let off = i * DIRENT_SIZE;
            let blk_index = off / FS_BLOCK_SIZE;
            let blk_off = off % FS_BLOCK_SIZE;
            let block = self.block_map(dip, blk_index, false)?;
            let buf = self.cache.bread(block)?;
            let dirent = decode_dirent(&self.cache.get_data(buf)[blk_off..blk_off + DIRENT_SIZE]);
            self.cache.brelse(buf)?;
            if dirent.ino != NULL_INODE {
                out.push(dirent);
            }
        }
        Ok(out)
    }

    /// `file_block_count`: walks every zone level and counts
    /// non-null block pointers, including the indirect pointer blocks
    /// themselves.
    pub fn file_block_count(&mut self, dip: &Dinode) -> Result<u32> {
        let mut count = 0u32;
        for i in 0..NDIRECT {
            if dip.zones[i] != NULL_BLOCK {
                count += 1;
            }
        }
        if dip.zones[NDIRECT] != NULL_BLOCK {
            count += 1;
            let buf = self.cache.bread(dip.zones[NDIRECT] as u32)?;
            let ptrs = read_ptrs(self.cache.get_data(buf));
            self.cache.brelse(buf)?;
            count += ptrs.iter().filter(|&&p| p != NULL_BLOCK).count() as u32;
        }
        if dip.zones[NDIRECT + 1] != NULL_BLOCK {
            count += 1;
            let buf = self.cache.bread(dip.zones[NDIRECT + 1] as u32)?;
            let outer = read_ptrs(self.cache.get_data(buf));
            self.cache.brelse(buf)?;
            for p in outer {
                if p != NULL_BLOCK {
                    count += 1;
                    let buf = self.cache.bread(p as u32)?;
                    let inner = read_ptrs(self.cache.get_data(buf));
                    self.cache.brelse(buf)?;
                    count += inner.iter().filter(|&&q| q != NULL_BLOCK).count() as u32;
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkfs_produces_root_with_dot_entries() {
        let mut fs = Minix::mkfs(1024 * 1024, 128, 16, 0, 0).unwrap();
        let mut root = fs.read_dinode(ROOT_INODE).unwrap();
        assert!(is_dir(root.mode));
        let entries = fs.dirent_list(&mut root).unwrap();
        let names: Vec<_> = entries.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"disk"));
    }

    #[test]
    fn dirent_roll_over_grows_size_by_one_entry_each_time() {
        // Scenario 6: fill a directory with 64 entries.
        let mut fs = Minix::mkfs(4 * 1024 * 1024, 256, 32, 0, 0).unwrap();
        let mut root = fs.read_dinode(ROOT_INODE).unwrap();
        let base_size = root.size;
        for i in 0..64 {
            let ino = fs.inode_alloc(S_IFREG | S_IRUSR | S_IWUSR, 0, 0).unwrap();
            fs.dirent_add(&mut root, &format!("f{i}"), ino).unwrap();
            assert_eq!(root.size, base_size + (i as u32 + 1) * DIRENT_SIZE as u32);
        }
        let off = fs.dirent_search(&mut root, "f10", false).unwrap();
        assert_eq!((off - base_size as u64) % DIRENT_SIZE as u64, 0);
    }

    #[test]
    fn block_map_allocates_across_direct_and_indirect_zones() {
        let mut fs = Minix::mkfs(8 * 1024 * 1024, 64, 32, 0, 0).unwrap();
        let mut dip = Dinode::blank(S_IFREG | S_IRUSR | S_IWUSR, 0, 0);
        let direct = fs.block_map(&mut dip, 3, true).unwrap();
        assert_ne!(direct, 0);
        let indirect = fs.block_map(&mut dip, NDIRECT + 10, true).unwrap();
        assert_ne!(indirect, 0);
        assert_ne!(dip.zones[NDIRECT], NULL_BLOCK);
        // Re-reading the same logical index without create must be stable.
        let again = fs.block_map(&mut dip, NDIRECT + 10, false).unwrap();
        assert_eq!(indirect, again);
    }

    #[test]
    fn free_all_zones_clears_indirect_pointers_too() {
        let mut fs = Minix::mkfs(8 * 1024 * 1024, 64, 32, 0, 0).unwrap();
        let mut dip = Dinode::blank(S_IFREG | S_IRUSR | S_IWUSR, 0, 0);
        fs.block_map(&mut dip, NDIRECT + 5, true).unwrap();
        fs.free_all_zones(&mut dip).unwrap();
        assert_eq!(dip.size, 0);
        assert!(dip.zones.iter().all(|&z| z == NULL_BLOCK));
    }

    #[test]
    fn dirent_remove_refuses_dot() {
        let mut fs = Minix::mkfs(1024 * 1024, 128, 16, 0, 0).unwrap();
        let mut root = fs.read_dinode(ROOT_INODE).unwrap();
        assert_eq!(fs.dirent_remove(&mut root, "."), Err(Errno::Eacces));
    }

    #[test]
    fn superblock_round_trips_through_bytes() {
        let sb = Superblock {
            ninodes: 128,
            nblocks: 4096,
            imap_nblocks: 1,
            bmap_nblocks: 4,
            first_data_block: 20,
            unused: 0,
            max_size: 999,
            magic: MAGIC,
            _pad: 0,
        };
        let bytes = sb.as_bytes().to_vec();
        let back = Superblock::read_from(&bytes[..]).unwrap();
        assert_eq!(back.magic, MAGIC);
        assert_eq!(back.ninodes, sb.ninodes);
        assert_eq!(back.first_data_block, sb.first_data_block);
    }
}
