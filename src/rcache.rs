//! Client-side page cache fronting RMEM.
//!
//! One `RCache` is local to a single process: it is not a coherence
//! domain by itself, just a write-back cache with a pluggable eviction
//! policy over a fixed number of lines. Coherence across processes that
//! cache the same page is the SHM server's `INVAL` broadcast, not
//! anything this module does.

use crate::config::RMEM_BLOCK_SIZE;
use crate::error::{Errno, Result};
use crate::message::Pid;
use crate::rmem::{RmemClient, RPage, NULL_PAGE};

/// The policy set is closed by design: a function-pointer dispatch in the
/// source becomes a small enum matched in the eviction path.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplacementPolicy {
    /// Always evicts line 0, flushing it first. Every `get` misses.
    Bypass,
    /// Evicts the youngest-age empty line if one exists, otherwise the
    /// line with the smallest age.
    Fifo,
}

impl ReplacementPolicy {
    /// `select_policy`: unknown numeric codes fall back to `Bypass` with a
    /// warning, per the design.
    pub fn select(num: u32) -> Self {
        match num {
            0 => ReplacementPolicy::Bypass,
            1 => ReplacementPolicy::Fifo,
            other => {
                tracing::warn!(code = other, "unknown replacement policy, falling back to BYPASS");
                ReplacementPolicy::Bypass
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    age: u64,
    pgnum: RPage,
    refcount: u32,
    data: Vec<u8>,
}

impl Line {
    fn empty() -> Self {
        Self {
            age: 0,
            pgnum: NULL_PAGE,
            refcount: 0,
            data: vec![0u8; RMEM_BLOCK_SIZE],
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub ngets: u64,
    pub nmisses: u64,
    pub nhits: u64,
}

pub struct RCache {
    lines: Vec<Line>,
    policy: ReplacementPolicy,
    stats: Stats,
    clock: u64,
    pid: Pid,
    rmem: RmemClient,
}

impl RCache {
    pub fn new(pid: Pid, rmem: RmemClient, length: usize, policy: ReplacementPolicy) -> Self {
        Self {
            lines: (0..length).map(|_| Line::empty()).collect(),
            policy,
            stats: Stats::default(),
            clock: 0,
            pid,
            rmem,
        }
    }

    pub fn select_policy(&mut self, num: u32) {
        self.policy = ReplacementPolicy::select(num);
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn find_line(&self, page: RPage) -> Option<usize> {
        self.lines.iter().position(|l| l.pgnum == page)
    }

    /// Flushes a dirty line's contents back to RMEM if it still refers to
    /// a live page, then marks the line empty.
    fn evict(&mut self, idx: usize) {
        let pgnum = self.lines[idx].pgnum;
        if pgnum != NULL_PAGE {
            let data = self.lines[idx].data.clone();
            // Best-effort: a flush failure just means the page was freed
            // out from under the cache, which is not this layer's job to
            // recover from.
            let _ = self.rmem.write(self.pid, pgnum, data);
        }
        self.lines[idx] = Line::empty();
    }

    /// Picks the victim line per the active policy, evicting (and
    /// flushing if dirty) in the process, and returns its index.
    fn select_victim(&mut self) -> usize {
        match self.policy {
            ReplacementPolicy::Bypass => {
                self.evict(0);
                0
            }
            ReplacementPolicy::Fifo => {
                let empty = self
                    .lines
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| l.pgnum == NULL_PAGE)
                    .max_by_key(|(_, l)| l.age)
                    .map(|(i, _)| i);
                let idx = empty.unwrap_or_else(|| {
                    self.lines
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, l)| l.age)
                        .map(|(i, _)| i)
                        .expect("RCACHE_LENGTH must be nonzero")
                });
                self.evict(idx);
                idx
            }
        }
    }

    /// Forwards to RMEM directly; no line is allocated eagerly.
    pub fn alloc(&self) -> Result<RPage> {
        self.rmem.alloc(self.pid)
    }

    /// Forwards to RMEM and bypasses any cached copy. A line still
    /// holding this page number is left alone: the behavior of a
    /// subsequent `get` colliding with a freshly reallocated handle with
    /// the same number is intentionally left unclear upstream (an
    /// RCACHE-level stale-hit hazard, not something to paper over here).
    pub fn free(&self, page: RPage) -> Result<()> {
        self.rmem.free(self.pid, page)
    }

    /// Returns a mutable view into the line holding `page`, reading it
    /// from RMEM on a miss.
    pub fn get(&mut self, page: RPage) -> Result<&mut [u8]> {
        self.stats.ngets += 1;
        let age = self.tick();

        if self.policy != ReplacementPolicy::Bypass {
            if let Some(idx) = self.find_line(page) {
                self.stats.nhits += 1;
                self.lines[idx].age = age;
                self.lines[idx].refcount += 1;
                return Ok(&mut self.lines[idx].data);
            }
        }

        self.stats.nmisses += 1;
        let idx = self.select_victim();
        let data = self.rmem.read(page)?;
        self.lines[idx] = Line {
            age,
            pgnum: page,
            refcount: 1,
            data,
        };
        Ok(&mut self.lines[idx].data)
    }

    /// Releases a reference obtained through `get`; flushes the line back
    /// to RMEM once the refcount reaches zero. `_strike_hint` is reserved
    /// for future eviction policies and currently has no effect.
    pub fn put(&mut self, page: RPage, _strike_hint: u32) -> Result<()> {
        let idx = self.find_line(page).ok_or(Errno::Einval)?;
        self.lines[idx].refcount = self.lines[idx].refcount.saturating_sub(1);
        if self.lines[idx].refcount == 0 {
            let data = self.lines[idx].data.clone();
            self.rmem.write(self.pid, page, data)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of distinct pages currently resident, for the cache
    /// inclusion-bound invariant.
    pub fn resident_count(&self) -> usize {
        self.lines.iter().filter(|l| l.pgnum != NULL_PAGE).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rmem::RmemClient;

    fn setup(length: usize, policy: ReplacementPolicy) -> RCache {
        let rmem = RmemClient::spawn_local(0, 64);
        RCache::new(1, rmem, length, policy)
    }

    #[test]
    fn cache_inclusion_bound_never_exceeded() {
        let mut cache = setup(4, ReplacementPolicy::Fifo);
        for _ in 0..10 {
            let h = cache.alloc().unwrap();
            cache.get(h).unwrap();
            cache.put(h, 0).unwrap();
            assert!(cache.resident_count() <= 4);
        }
    }

    #[test]
    fn single_writer_round_trip_survives_eviction() {
        let mut cache = setup(2, ReplacementPolicy::Fifo);
        let h = cache.alloc().unwrap();
        {
            let buf = cache.get(h).unwrap();
            buf.copy_from_slice(&[5u8; RMEM_BLOCK_SIZE]);
        }
        cache.put(h, 0).unwrap();

        // Force eviction by touching enough other pages.
        for _ in 0..4 {
            let other = cache.alloc().unwrap();
            cache.get(other).unwrap();
            cache.put(other, 0).unwrap();
        }

        let buf = cache.get(h).unwrap();
        assert_eq!(buf, &[5u8; RMEM_BLOCK_SIZE][..]);
        cache.put(h, 0).unwrap();
    }

    #[test]
    fn fifo_reuse_counts_as_hit() {
        // Scenario 2: fill RCACHE_LENGTH + 1 pages, then the first one is
        // evicted by the time we come back to it.
        let length = 4;
        let mut cache = setup(length, ReplacementPolicy::Fifo);
        let mut handles = Vec::new();
        for i in 0..length + 1 {
            let h = cache.alloc().unwrap();
            let buf = cache.get(h).unwrap();
            buf.fill(i as u8);
            cache.put(h, 0).unwrap();
            handles.push(h);
        }
        let stats_before = cache.stats();
        assert!(stats_before.nmisses >= (length + 1) as u64);

        cache.get(handles[0]).unwrap();
        cache.put(handles[0], 0).unwrap();
        let stats_after = cache.stats();
        assert_eq!(stats_after.nmisses, stats_before.nmisses + 1);
    }

    #[test]
    fn bypass_policy_always_misses() {
        let mut cache = setup(4, ReplacementPolicy::Bypass);
        let h = cache.alloc().unwrap();
        cache.get(h).unwrap();
        cache.put(h, 0).unwrap();
        cache.get(h).unwrap();
        cache.put(h, 0).unwrap();
        assert_eq!(cache.stats().nhits, 0);
        assert_eq!(cache.stats().nmisses, 2);
    }

    #[test]
    fn select_policy_falls_back_to_bypass_on_unknown_code() {
        let mut cache = setup(2, ReplacementPolicy::Fifo);
        cache.select_policy(99);
        assert_eq!(cache.policy, ReplacementPolicy::Bypass);
    }
}
