//! In-memory inode table.
//!
//! A fixed-size table of cached disk inodes, searched linearly like
//! every other table in this core. Each entry owns a copy of its
//! `Dinode` record; `inode_put` writes it back and, once both the
//! in-memory refcount and the on-disk link count reach zero, frees the
//! disk inode itself.

use crate::error::{Errno, Result};
use crate::vfs::minix::{Dinode, Minix, NULL_INODE};

struct Entry {
    used: bool,
    num: u16,
    count: u32,
    data: Dinode,
}

pub struct InodeTable {
    entries: Vec<Entry>,
}

impl InodeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity)
                .map(|_| Entry {
                    used: false,
                    num: NULL_INODE,
                    count: 0,
                    data: Dinode::blank(0, 0, 0),
                })
                .collect(),
        }
    }

    fn find(&self, num: u16) -> Option<usize> {
        self.entries.iter().position(|e| e.used && e.num == num)
    }

    /// `inode_get`: search the table; on hit bump the refcount, on miss
    /// read the disk inode into a free slot.
    pub fn inode_get(&mut self, fs: &mut Minix, num: u16) -> Result<usize> {
        if let Some(idx) = self.find(num) {
            self.entries[idx].count += 1;
            return Ok(idx);
        }
        let idx = self.entries.iter().position(|e| !e.used).ok_or(Errno::Enfile)?;
        let data = fs.read_dinode(num)?;
        self.entries[idx] = Entry {
            used: true,
            num,
            count: 1,
            data,
        };
        Ok(idx)
    }

    /// `inode_alloc`: combine `Minix::inode_alloc` with table insertion.
    pub fn inode_alloc(&mut self, fs: &mut Minix, mode: u16, uid: u16, gid: u8) -> Result<usize> {
        let num = fs.inode_alloc(mode, uid, gid)?;
        self.inode_get(fs, num)
    }

    /// `inode_put`: write back, and on `count == 0 && nlinks == 0` free
    /// the disk inode and clear the slot.
    pub fn inode_put(&mut self, fs: &mut Minix, idx: usize) -> Result<()> {
        fs.write_dinode(self.entries[idx].num, &self.entries[idx].data)?;
        self.entries[idx].count = self.entries[idx].count.saturating_sub(1);
        if self.entries[idx].count == 0 && self.entries[idx].data.nlinks == 0 {
            fs.inode_free(self.entries[idx].num);
            self.entries[idx].used = false;
        }
        Ok(())
    }

    /// `inode_write`: synchronous write-back without touching the
    /// refcount.
    pub fn inode_write(&mut self, fs: &mut Minix, idx: usize) -> Result<()> {
        fs.write_dinode(self.entries[idx].num, &self.entries[idx].data)
    }

    /// `inode_touch`: bump `time`. `now` is supplied by the caller so
    /// this module stays free of wall-clock reads.
    pub fn inode_touch(&mut self, idx: usize, now: u32) {
        self.entries[idx].data.time = now;
    }

    pub fn num(&self, idx: usize) -> u16 {
        self.entries[idx].num
    }

    pub fn data(&self, idx: usize) -> &Dinode {
        &self.entries[idx].data
    }

    pub fn data_mut(&mut self, idx: usize) -> &mut Dinode {
        &mut self.entries[idx].data
    }

    pub fn count(&self, idx: usize) -> u32 {
        self.entries[idx].count
    }

    pub fn bump(&mut self, idx: usize) {
        self.entries[idx].count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::minix::{Minix, S_IFREG, S_IRUSR, S_IWUSR};

    #[test]
    fn get_put_round_trip_frees_on_last_unlinked_put() {
        let mut fs = Minix::mkfs(1024 * 1024, 64, 16, 0, 0).unwrap();
        let mut table = InodeTable::new(8);
        let idx = table.inode_alloc(&mut fs, S_IFREG | S_IRUSR | S_IWUSR, 0, 0).unwrap();
        table.data_mut(idx).nlinks = 0;
        table.inode_put(&mut fs, idx).unwrap();
        // Slot is now free; a fresh alloc may reuse the table row.
        let idx2 = table.inode_alloc(&mut fs, S_IFREG | S_IRUSR | S_IWUSR, 0, 0).unwrap();
        assert_eq!(table.count(idx2), 1);
    }

    #[test]
    fn get_bumps_refcount_on_repeat_lookup() {
        let mut fs = Minix::mkfs(1024 * 1024, 64, 16, 0, 0).unwrap();
        let mut table = InodeTable::new(8);
        let idx = table.inode_alloc(&mut fs, S_IFREG | S_IRUSR | S_IWUSR, 0, 0).unwrap();
        let num = table.num(idx);
        let idx2 = table.inode_get(&mut fs, num).unwrap();
        assert_eq!(idx, idx2);
        assert_eq!(table.count(idx), 2);
    }
}
