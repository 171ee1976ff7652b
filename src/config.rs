//! Configuration knobs enumerated in the external-interface section of the
//! design: table dimensions and feature toggles that every server reads at
//! startup. A production deployment wires these from a config file or
//! environment; tests and the demo binary just use [`Config::default`].

use crate::rcache::ReplacementPolicy;

/// Size in bytes of one RMEM-backed page.
pub const RMEM_BLOCK_SIZE: usize = 4096;

/// Size in bytes of one MINIX file system block. Matches the on-disk
/// layout described for the VFS server; not configurable per instance.
pub const FS_BLOCK_SIZE: usize = 1024;

/// Maximum size, in bytes, of a mailbox message payload (the header plus
/// the largest opcode-specific argument tuple).
pub const MAILBOX_MESSAGE_SIZE: usize = 128;

#[derive(Debug, Clone)]
pub struct Config {
    /// Blocks held by a single RMEM server.
    pub rmem_num_blocks: usize,
    /// Number of RMEM servers a client's handles may be striped across.
    pub rmem_servers_num: usize,
    /// Lines held by one client's RCACHE.
    pub rcache_length: usize,
    /// Replacement policy a freshly started RCACHE selects by default.
    pub rcache_default_replacement: ReplacementPolicy,
    /// Region table size of the SHM server.
    pub shm_max: usize,
    /// Per-client open-region table size.
    pub shm_open_max: usize,
    /// Longest region name, including the terminator.
    pub shm_name_max: usize,
    /// Largest region a client may request; must not exceed
    /// [`RMEM_BLOCK_SIZE`] because a region is backed by exactly one page.
    pub shm_size_max: usize,
    /// In-memory inode table size of the VFS server.
    pub nr_inodes: usize,
    /// Open-file table size of the VFS server.
    pub nr_files: usize,
    /// RAM disk size in bytes backing the MINIX file system.
    pub disk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let shm_size_max = RMEM_BLOCK_SIZE;
        assert!(shm_size_max <= RMEM_BLOCK_SIZE);

        Self {
            rmem_num_blocks: 4096,
            rmem_servers_num: 1,
            rcache_length: 16,
            rcache_default_replacement: ReplacementPolicy::Fifo,
            shm_max: 64,
            shm_open_max: 16,
            shm_name_max: 32,
            shm_size_max,
            nr_inodes: 128,
            nr_files: 64,
            disk_size: 1024 * 1024,
        }
    }
}
