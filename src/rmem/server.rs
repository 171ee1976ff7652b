//! The RMEM server's request loop and the client stub that drives it.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use super::handle::{decode, encode, RPage, NULL_PAGE};
use crate::bitmap::Bitmap;
use crate::config::RMEM_BLOCK_SIZE;
use crate::error::{Errno, Result};
use crate::message::Pid;
use crate::transport::{self, portal_read, portal_write, Mailbox, Portal, PortalRx, PortalTx};

#[derive(Debug, Default, Clone, Copy)]
pub struct RmemStats {
    pub nallocs: u64,
    pub nfrees: u64,
    pub nreads: u64,
    pub nwrites: u64,
    pub nfaults: u64,
}

enum RmemRequest {
    Alloc {
        pid: Pid,
        reply: Sender<Result<RPage>>,
    },
    Free {
        pid: Pid,
        page: RPage,
        reply: Sender<Result<()>>,
    },
    /// Mirrors the mailbox-ACK-then-portal discipline: the ack is sent as
    /// soon as validity is known, the payload follows unconditionally so
    /// the client's portal read never blocks forever.
    Read {
        page: RPage,
        ack: Sender<Result<()>>,
        portal: PortalTx,
    },
    Write {
        page: RPage,
        portal: PortalRx,
        reply: Sender<Result<()>>,
    },
    Stats {
        reply: Sender<RmemStats>,
    },
    AllocatedCount {
        reply: Sender<usize>,
    },
    Exit,
}

/// Owns the backing store for one RMEM server.
pub struct RmemServer {
    id: u16,
    blocks: Vec<Vec<u8>>,
    owners: Vec<Option<Pid>>,
    bitmap: Bitmap,
    stats: RmemStats,
    inbox: Mailbox<RmemRequest>,
}

impl RmemServer {
    pub fn new(id: u16, num_blocks: usize) -> Self {
        let mut bitmap = Bitmap::new(num_blocks);
        // Block 0 is permanently reserved and never handed out.
        bitmap.set(0);
        Self {
            id,
            blocks: vec![vec![0u8; RMEM_BLOCK_SIZE]; num_blocks],
            owners: vec![None; num_blocks],
            bitmap,
            stats: RmemStats::default(),
            inbox: Mailbox::new(),
        }
    }

    fn valid_index(&self, page: RPage) -> Option<usize> {
        if page == NULL_PAGE {
            return None;
        }
        let (server_id, block) = decode(page);
        if server_id != self.id {
            return None;
        }
        let idx = block as usize;
        if idx >= self.bitmap.len() {
            None
        } else {
            Some(idx)
        }
    }

    fn do_alloc(&mut self, pid: Pid) -> Result<RPage> {
        let idx = self.bitmap.alloc().ok_or(Errno::Enomem)?;
        self.owners[idx] = Some(pid);
        self.stats.nallocs += 1;
        Ok(encode(self.id, idx as u16))
    }

    fn do_free(&mut self, pid: Pid, page: RPage) -> Result<()> {
        let idx = self.valid_index(page).ok_or(Errno::Einval)?;
        if !self.bitmap.check(idx) {
            return Err(Errno::Efault);
        }
        if self.owners[idx] != Some(pid) {
            return Err(Errno::Efault);
        }
        self.blocks[idx].fill(0);
        self.bitmap.clear(idx);
        self.owners[idx] = None;
        self.stats.nfrees += 1;
        Ok(())
    }

    /// Returns the data to ship over the portal and the status to ack.
    /// On a bad handle, the sink block is returned so the client's portal
    /// read always completes.
    fn do_read(&mut self, page: RPage) -> (Vec<u8>, Result<()>) {
        match self.valid_index(page).filter(|&i| self.bitmap.check(i)) {
            Some(idx) => {
                self.stats.nreads += 1;
                (self.blocks[idx].clone(), Ok(()))
            }
            None => {
                self.stats.nfaults += 1;
                (self.blocks[0].clone(), Err(Errno::Efault))
            }
        }
    }

    fn do_write(&mut self, page: RPage, data: Vec<u8>) -> Result<()> {
        match self.valid_index(page).filter(|&i| self.bitmap.check(i)) {
            Some(idx) => {
                self.blocks[idx].copy_from_slice(&data[..RMEM_BLOCK_SIZE]);
                self.stats.nwrites += 1;
                Ok(())
            }
            None => {
                // Redirect the inbound transfer into the sink block.
                self.blocks[0].copy_from_slice(&data[..RMEM_BLOCK_SIZE]);
                self.stats.nfaults += 1;
                Err(Errno::Efault)
            }
        }
    }

    fn run(mut self) {
        loop {
            match self.inbox.read() {
                Ok(RmemRequest::Alloc { pid, reply }) => {
                    let _ = reply.send(self.do_alloc(pid));
                }
                Ok(RmemRequest::Free { pid, page, reply }) => {
                    let _ = reply.send(self.do_free(pid, page));
                }
                Ok(RmemRequest::Read { page, ack, portal }) => {
                    let (data, status) = self.do_read(page);
                    let _ = ack.send(status);
                    let _ = portal_write(&portal, data);
                }
                Ok(RmemRequest::Write {
                    page,
                    portal,
                    reply,
                }) => {
                    let data = portal_read(&portal).unwrap_or_else(|_| vec![0u8; RMEM_BLOCK_SIZE]);
                    let _ = reply.send(self.do_write(page, data));
                }
                Ok(RmemRequest::Stats { reply }) => {
                    let _ = reply.send(self.stats);
                }
                Ok(RmemRequest::AllocatedCount { reply }) => {
                    let _ = reply.send(self.bitmap.count_set());
                }
                Ok(RmemRequest::Exit) | Err(_) => {
                    tracing::info!(id = self.id, "rmem server exiting");
                    return;
                }
            }
        }
    }
}

/// Client-side stub: the transport-level calls a user runtime would make
/// against `/rmem<id>`, collapsed into ordinary method calls.
#[derive(Clone)]
pub struct RmemClient {
    tx: Sender<RmemRequest>,
}

impl RmemClient {
    /// Spawns a server thread and returns a client bound to it directly,
    /// bypassing name-service resolution. Production callers go through
    /// [`crate::naming::NameClient::lookup`] first.
    pub fn spawn_local(id: u16, num_blocks: usize) -> Self {
        let server = RmemServer::new(id, num_blocks);
        let tx = server.inbox.sender();
        thread::spawn(move || server.run());
        Self { tx }
    }

    /// Spawns a server and links its well-known name with the name
    /// service, per the registration sequence in the design.
    pub fn spawn_registered(
        id: u16,
        num_blocks: usize,
        names: &crate::naming::NameClient,
        node: crate::message::NodeId,
        port: crate::message::PortId,
    ) -> (Self, JoinHandle<()>) {
        let server = RmemServer::new(id, num_blocks);
        let tx = server.inbox.sender();
        let handle = thread::spawn(move || server.run());
        names
            .link(&format!("/rmem{id}"), node, port)
            .expect("rmem name registration");
        (Self { tx }, handle)
    }

    pub fn alloc(&self, pid: Pid) -> Result<RPage> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(RmemRequest::Alloc { pid, reply })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn free(&self, pid: Pid, page: RPage) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(RmemRequest::Free { pid, page, reply })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    /// Full two-stage read: waits for the mailbox ACK, then reads the
    /// portal payload. Returns the dummy sink bytes alongside `Efault` on
    /// a bad handle instead of discarding them, mirroring the transport
    /// guarantee that the portal read always completes.
    pub fn read_raw(&self, page: RPage) -> (Vec<u8>, Result<()>) {
        let (portal_tx, portal_rx) = Portal::open();
        let (ack_tx, ack_rx) = transport::reply_channel();
        if self
            .tx
            .send(RmemRequest::Read {
                page,
                ack: ack_tx,
                portal: portal_tx,
            })
            .is_err()
        {
            return (vec![0u8; RMEM_BLOCK_SIZE], Err(Errno::Eagain));
        }
        let status = transport::reply_wait(&ack_rx).unwrap_or(Err(Errno::Eagain));
        let data = portal_read(&portal_rx).unwrap_or_else(|_| vec![0u8; RMEM_BLOCK_SIZE]);
        (data, status)
    }

    pub fn read(&self, page: RPage) -> Result<Vec<u8>> {
        let (data, status) = self.read_raw(page);
        status.map(|()| data)
    }

    pub fn write(&self, _pid: Pid, page: RPage, data: Vec<u8>) -> Result<()> {
        assert_eq!(data.len(), RMEM_BLOCK_SIZE, "write payload must be one block");
        let (portal_tx, portal_rx) = Portal::open();
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(RmemRequest::Write {
                page,
                portal: portal_rx,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        portal_write(&portal_tx, data)?;
        transport::reply_wait(&rx)?
    }

    pub fn stats(&self) -> RmemStats {
        let (reply, rx) = transport::reply_channel();
        if self.tx.send(RmemRequest::Stats { reply }).is_err() {
            return RmemStats::default();
        }
        transport::reply_wait(&rx).unwrap_or_default()
    }

    pub fn allocated_count(&self) -> usize {
        let (reply, rx) = transport::reply_channel();
        if self.tx.send(RmemRequest::AllocatedCount { reply }).is_err() {
            return 0;
        }
        transport::reply_wait(&rx).unwrap_or(0)
    }

    pub fn exit(&self) {
        let _ = self.tx.send(RmemRequest::Exit);
    }
}
