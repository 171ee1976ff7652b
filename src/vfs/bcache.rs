//! RAM disk and block cache backing the MINIX file system.
//!
//! The disk itself is a flat byte vector standing in for the real block
//! device a file system like this would sit on; there is no persistence
//! across process lifetimes, by design (no reboot durability is modeled).
//! The cache in front of it is a fixed array of buffers searched linearly
//! on lookup and evicted by a clock-hand sweep when full.

use crate::config::FS_BLOCK_SIZE;
use crate::error::{Errno, Result};

pub struct Disk {
    bytes: Vec<u8>,
}

impl Disk {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn offset(block_num: u32) -> usize {
        block_num as usize * FS_BLOCK_SIZE
    }

    fn read_block(&self, block_num: u32, out: &mut [u8]) {
        let off = Self::offset(block_num);
        out.copy_from_slice(&self.bytes[off..off + FS_BLOCK_SIZE]);
    }

    fn write_block(&mut self, block_num: u32, data: &[u8]) {
        let off = Self::offset(block_num);
        self.bytes[off..off + FS_BLOCK_SIZE].copy_from_slice(data);
    }
}

struct Buffer {
    valid: bool,
    dirty: bool,
    block_num: u32,
    count: u32,
    data: Vec<u8>,
}

impl Buffer {
    fn empty() -> Self {
        Self {
            valid: false,
            dirty: false,
            block_num: 0,
            count: 0,
            data: vec![0u8; FS_BLOCK_SIZE],
        }
    }
}

/// A handle into a resident buffer, valid until the matching `brelse`.
pub type BufHandle = usize;

pub struct BlockCache {
    disk: Disk,
    buffers: Vec<Buffer>,
    clock_hand: usize,
}

impl BlockCache {
    pub fn new(disk: Disk, nr_buffers: usize) -> Self {
        Self {
            disk,
            buffers: (0..nr_buffers).map(|_| Buffer::empty()).collect(),
            clock_hand: 0,
        }
    }

    pub fn disk_size(&self) -> usize {
        self.disk.size()
    }

    fn flush(&mut self, idx: BufHandle) {
        let buf = &mut self.buffers[idx];
        if buf.valid && buf.dirty {
            self.disk.write_block(buf.block_num, &buf.data);
            buf.dirty = false;
        }
    }

    /// Clock-hand sweep: skips pinned (`count > 0`) buffers,
    /// prefers an unused clean one, falls back to flushing an unused
    /// dirty one. Fails only if every buffer is pinned.
    fn evict(&mut self) -> Result<BufHandle> {
        let n = self.buffers.len();
        let mut dirty_candidate = None;
        for step in 0..n {
            let i = (self.clock_hand + step) % n;
            let buf = &self.buffers[i];
            if buf.count > 0 {
                continue;
            }
            if !buf.dirty {
                self.clock_hand = (i + 1) % n;
                return Ok(i);
            }
            if dirty_candidate.is_none() {
                dirty_candidate = Some(i);
            }
        }
        match dirty_candidate {
            Some(i) => {
                self.flush(i);
                self.clock_hand = (i + 1) % n;
                Ok(i)
            }
            None => Err(Errno::Enfile),
        }
    }

    pub fn bread(&mut self, block_num: u32) -> Result<BufHandle> {
        if let Some(idx) = self
            .buffers
            .iter()
            .position(|b| b.valid && b.block_num == block_num)
        {
            self.buffers[idx].count += 1;
            return Ok(idx);
        }
        let idx = self.evict()?;
        self.disk.read_block(block_num, &mut self.buffers[idx].data);
        self.buffers[idx].valid = true;
        self.buffers[idx].dirty = false;
        self.buffers[idx].block_num = block_num;
        self.buffers[idx].count = 1;
        Ok(idx)
    }

    pub fn brelse(&mut self, idx: BufHandle) -> Result<()> {
        self.buffers[idx].count = self.buffers[idx].count.saturating_sub(1);
        Ok(())
    }

    pub fn bwrite(&mut self, idx: BufHandle) -> Result<()> {
        self.flush(idx);
        self.brelse(idx)
    }

    pub fn bwrite2(&mut self, idx: BufHandle) -> Result<()> {
        self.flush(idx);
        Ok(())
    }

    pub fn set_dirty(&mut self, idx: BufHandle) {
        self.buffers[idx].dirty = true;
    }

    pub fn is_dirty(&self, idx: BufHandle) -> bool {
        self.buffers[idx].dirty
    }

    pub fn get_data(&self, idx: BufHandle) -> &[u8] {
        &self.buffers[idx].data
    }

    pub fn get_data_mut(&mut self, idx: BufHandle) -> &mut [u8] {
        &mut self.buffers[idx].data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(nr_buffers: usize) -> BlockCache {
        BlockCache::new(Disk::new(FS_BLOCK_SIZE * 64), nr_buffers)
    }

    #[test]
    fn write_back_survives_eviction() {
        let mut cache = setup(2);
        let buf = cache.bread(5).unwrap();
        cache.get_data_mut(buf).fill(0xAB);
        cache.set_dirty(buf);
        cache.bwrite(buf).unwrap();

        // Evict it by reading two other blocks through the 2-slot cache.
        let b1 = cache.bread(6).unwrap();
        cache.brelse(b1).unwrap();
        let b2 = cache.bread(7).unwrap();
        cache.brelse(b2).unwrap();

        let reread = cache.bread(5).unwrap();
        assert_eq!(cache.get_data(reread), &[0xABu8; FS_BLOCK_SIZE][..]);
    }

    #[test]
    fn pinned_buffers_are_never_evicted() {
        let mut cache = setup(1);
        let buf = cache.bread(1).unwrap(); // count == 1, pinned
        assert_eq!(cache.bread(2), Err(Errno::Enfile));
        cache.brelse(buf).unwrap();
        assert!(cache.bread(2).is_ok());
    }

    #[test]
    fn cache_hit_increments_refcount_without_disk_access() {
        let mut cache = setup(4);
        let a = cache.bread(9).unwrap();
        cache.get_data_mut(a).fill(1);
        cache.brelse(a).unwrap();
        let b = cache.bread(9).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.get_data(b)[0], 1);
    }
}
