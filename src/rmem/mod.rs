//! RMEM page server: the backing store for 4 KiB remote-memory pages.
//!
//! Each server owns a contiguous array of [`RMEM_BLOCK_SIZE`] blocks, a
//! bitmap of which are allocated, and an `owners` sidecar recording which
//! process allocated each block. Block 0 is permanently reserved and
//! serves as the zeroed sink redirected to on a faulted READ/WRITE, so a
//! client's portal transfer always completes even when its handle is bad.

mod handle;
mod server;

pub use handle::{decode, encode, RPage, NULL_PAGE};
pub use server::{RmemClient, RmemServer, RmemStats};

use crate::config::RMEM_BLOCK_SIZE as BLOCK_SIZE;

pub const RMEM_BLOCK_SIZE: usize = BLOCK_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;
    use crate::message::Pid;

    fn spawn_one(id: u16, num_blocks: usize) -> RmemClient {
        RmemClient::spawn_local(id, num_blocks)
    }

    #[test]
    fn rmem_smoke_scenario() {
        // Scenario 1 from the design's testable-properties section.
        let pid: Pid = 7;
        let client = spawn_one(0, 4096);

        let h1 = client.alloc(pid).unwrap();
        let (server_id, block) = decode(h1);
        assert_eq!(server_id, 0);
        assert_eq!(block, 1);

        client.write(pid, h1, vec![1u8; RMEM_BLOCK_SIZE]).unwrap();
        let data = client.read(h1).unwrap();
        assert_eq!(data, vec![1u8; RMEM_BLOCK_SIZE]);

        client.free(pid, h1).unwrap();
        assert_eq!(client.allocated_count(), 1); // just the permanently-reserved bit 0
    }

    #[test]
    fn alloc_burst_exhausts_then_enomem() {
        let client = spawn_one(0, 8);
        let pid = 1;
        // 8 blocks total, block 0 reserved: 7 successful allocations.
        let mut handles = Vec::new();
        for _ in 0..7 {
            handles.push(client.alloc(pid).unwrap());
        }
        assert_eq!(client.alloc(pid), Err(Errno::Enomem));
        for h in handles {
            client.free(pid, h).unwrap();
        }
    }

    #[test]
    fn free_by_non_owner_fails() {
        let client = spawn_one(0, 8);
        let h = client.alloc(1).unwrap();
        assert_eq!(client.free(2, h), Err(Errno::Efault));
        client.free(1, h).unwrap();
    }

    #[test]
    fn free_invalid_handle_is_einval() {
        let client = spawn_one(0, 8);
        assert_eq!(client.free(1, NULL_PAGE), Err(Errno::Einval));
        assert_eq!(client.free(1, encode(0, 999)), Err(Errno::Einval));
    }

    #[test]
    fn free_unallocated_block_is_efault() {
        let client = spawn_one(0, 8);
        let unallocated = encode(0, 3);
        assert_eq!(client.free(1, unallocated), Err(Errno::Efault));
    }

    #[test]
    fn read_write_invalid_handle_redirects_to_sink() {
        let client = spawn_one(0, 8);
        let bogus = encode(0, 3);
        let (data, err) = client.read_raw(bogus);
        assert_eq!(err, Err(Errno::Efault));
        assert_eq!(data.len(), RMEM_BLOCK_SIZE);

        let err = client.write(1, bogus, vec![9u8; RMEM_BLOCK_SIZE]);
        assert_eq!(err, Err(Errno::Efault));
    }

    #[test]
    fn write_then_read_round_trip() {
        let client = spawn_one(0, 8);
        let h = client.alloc(1).unwrap();
        let payload: Vec<u8> = (0..RMEM_BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        client.write(1, h, payload.clone()).unwrap();
        assert_eq!(client.read(h).unwrap(), payload);
    }
}
