//! Shared memory region server.
//!
//! A name-to-page directory that multiplexes named shared regions onto
//! single RMEM pages. Follows the same single-threaded request-loop shape
//! as the RMEM and name-service servers in this crate: one inbox, one
//! owned table, no suspension within a request.

use std::thread;

use bitflags::bitflags;
use crossbeam_channel::Sender;

use crate::error::{Errno, Result};
use crate::message::Pid;
use crate::rmem::{RmemClient, RPage, NULL_PAGE};
use crate::transport::{self, Mailbox};

bitflags! {
    /// Opening-flag bits recognized by CREATE/OPEN, matching
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0;
        const O_WRONLY = 1 << 0;
        const O_RDWR   = 1 << 1;
        const O_CREAT  = 1 << 2;
        const O_EXCL   = 1 << 3;
        const O_TRUNC  = 1 << 4;
    }
}

impl OpenFlags {
    /// The access-mode sub-mask packed into the low bits of the flags
    /// word, per
    pub fn accmode(self) -> OpenFlags {
        self & (OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
    }

    fn writable(self) -> bool {
        self.intersects(OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
    }
}

bitflags! {
    /// Access permission bits recognized by
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct Mode: u32 {
        const S_IRUSR = 1 << 0;
        const S_IWUSR = 1 << 1;
    }
}

/// A shared-memory region record
#[derive(Debug, Clone)]
struct Region {
    used: bool,
    pending_removal: bool,
    name: String,
    owner: Pid,
    refcount: u32,
    mode: Mode,
    size: usize,
    page: RPage,
}

impl Region {
    fn empty() -> Self {
        Self {
            used: false,
            pending_removal: false,
            name: String::new(),
            owner: 0,
            refcount: 0,
            mode: Mode::empty(),
            size: 0,
            page: NULL_PAGE,
        }
    }
}

pub type ShmId = usize;

enum ShmRequest {
    Create {
        pid: Pid,
        name: String,
        oflags: OpenFlags,
        mode: Mode,
        reply: Sender<Result<ShmId>>,
    },
    Open {
        pid: Pid,
        name: String,
        oflags: OpenFlags,
        reply: Sender<Result<ShmId>>,
    },
    Ftruncate {
        shmid: ShmId,
        size: usize,
        reply: Sender<Result<()>>,
    },
    Close {
        shmid: ShmId,
        reply: Sender<Result<()>>,
    },
    Unlink {
        pid: Pid,
        name: String,
        reply: Sender<Result<()>>,
    },
    Page {
        shmid: ShmId,
        reply: Sender<Result<RPage>>,
    },
    Connect {
        pid: Pid,
        inval: Sender<ShmId>,
    },
    Disconnect {
        pid: Pid,
    },
    Inval {
        shmid: ShmId,
        requester: Pid,
    },
    Exit,
}

fn validate_name(name: &str, name_max: usize) -> Result<()> {
    if name.is_empty() || name == "/" {
        return Err(Errno::Einval);
    }
    if name.len() >= name_max {
        return Err(Errno::Enametoolong);
    }
    Ok(())
}

/// Server-side state: the region table plus a connection table used only
/// to route `INVAL` broadcasts.
pub struct ShmServer {
    regions: Vec<Region>,
    shm_size_max: usize,
    shm_name_max: usize,
    connections: Vec<(Pid, Sender<ShmId>)>,
    rmem: RmemClient,
    inbox: Mailbox<ShmRequest>,
}

impl ShmServer {
    pub fn new(shm_max: usize, shm_name_max: usize, shm_size_max: usize, rmem: RmemClient) -> Self {
        Self {
            regions: vec![Region::empty(); shm_max],
            shm_size_max,
            shm_name_max,
            connections: Vec::new(),
            rmem,
            inbox: Mailbox::new(),
        }
    }

    fn find_by_name(&self, name: &str) -> Option<ShmId> {
        self.regions.iter().position(|r| r.used && r.name == name)
    }

    fn do_ftruncate(&mut self, shmid: ShmId, size: usize) -> Result<()> {
        if size > self.shm_size_max {
            return Err(Errno::Efbig);
        }
        let (used, writable, refcount, owner, page) = {
            let region = self.regions.get(shmid).ok_or(Errno::Einval)?;
            (region.used, region.mode.contains(Mode::S_IWUSR), region.refcount, region.owner, region.page)
        };
        if !used {
            return Err(Errno::Einval);
        }
        if !writable {
            return Err(Errno::Eacces);
        }
        // "Mapped" is approximated here by a nonzero refcount beyond the
        // creator's own reference: any concurrent opener blocks a resize.
        if refcount > 1 {
            return Err(Errno::Ebusy);
        }

        if size > 0 && page == NULL_PAGE {
            let new_page = self.rmem.alloc(owner)?;
            self.regions[shmid].page = new_page;
        } else if size == 0 && page != NULL_PAGE {
            self.rmem.free(owner, page)?;
            self.regions[shmid].page = NULL_PAGE;
        }
        self.regions[shmid].size = size;
        Ok(())
    }

    fn finalize(&mut self, shmid: ShmId) {
        let region = &self.regions[shmid];
        if region.page != NULL_PAGE {
            let _ = self.rmem.free(region.owner, region.page);
        }
        self.regions[shmid] = Region::empty();
    }

    fn do_create(&mut self, pid: Pid, name: String, oflags: OpenFlags, mode: Mode) -> Result<ShmId> {
        validate_name(&name, self.shm_name_max)?;
        if !oflags.contains(OpenFlags::O_CREAT) {
            return Err(Errno::Einval);
        }
        if !mode.contains(Mode::S_IWUSR) {
            return Err(Errno::Eacces);
        }
        if let Some(existing) = self.find_by_name(&name) {
            if oflags.contains(OpenFlags::O_EXCL) {
                return Err(Errno::Eexist);
            }
            return Ok(existing);
        }
        let idx = self
            .regions
            .iter()
            .position(|r| !r.used)
            .ok_or(Errno::Enospc)?;
        self.regions[idx] = Region {
            used: true,
            pending_removal: false,
            name,
            owner: pid,
            refcount: 1,
            mode,
            size: 0,
            page: NULL_PAGE,
        };
        Ok(idx)
    }

    fn do_open(&mut self, pid: Pid, name: String, oflags: OpenFlags) -> Result<ShmId> {
        validate_name(&name, self.shm_name_max)?;
        match self.find_by_name(&name) {
            Some(shmid) => {
                if oflags.contains(OpenFlags::O_TRUNC) {
                    if !oflags.writable() {
                        return Err(Errno::Eacces);
                    }
                    self.do_ftruncate(shmid, 0)?;
                }
                self.regions[shmid].refcount += 1;
                let _ = pid;
                Ok(shmid)
            }
            None => {
                if oflags.contains(OpenFlags::O_CREAT) {
                    self.do_create(pid, name, oflags, Mode::S_IRUSR | Mode::S_IWUSR)
                } else {
                    Err(Errno::Einval)
                }
            }
        }
    }

    fn do_close(&mut self, shmid: ShmId) -> Result<()> {
        let region = self.regions.get_mut(shmid).ok_or(Errno::Einval)?;
        if !region.used {
            return Err(Errno::Einval);
        }
        region.refcount = region.refcount.saturating_sub(1);
        let should_finalize = region.refcount == 0 && region.pending_removal;
        if should_finalize {
            self.finalize(shmid);
        }
        Ok(())
    }

    fn do_unlink(&mut self, pid: Pid, name: &str) -> Result<()> {
        let shmid = self.find_by_name(name).ok_or(Errno::Enoent)?;
        if self.regions[shmid].owner != pid {
            return Err(Errno::Eacces);
        }
        self.regions[shmid].pending_removal = true;
        if self.regions[shmid].refcount == 0 {
            self.finalize(shmid);
        }
        Ok(())
    }

    fn do_inval(&self, shmid: ShmId, requester: Pid) {
        for (pid, tx) in &self.connections {
            if *pid != requester {
                let _ = tx.send(shmid);
            }
        }
    }

    fn run(mut self) {
        loop {
            match self.inbox.read() {
                Ok(ShmRequest::Create {
                    pid,
                    name,
                    oflags,
                    mode,
                    reply,
                }) => {
                    let _ = reply.send(self.do_create(pid, name, oflags, mode));
                }
                Ok(ShmRequest::Open {
                    pid,
                    name,
                    oflags,
                    reply,
                }) => {
                    let _ = reply.send(self.do_open(pid, name, oflags));
                }
                Ok(ShmRequest::Ftruncate { shmid, size, reply }) => {
                    let _ = reply.send(self.do_ftruncate(shmid, size));
                }
                Ok(ShmRequest::Close { shmid, reply }) => {
                    let _ = reply.send(self.do_close(shmid));
                }
                Ok(ShmRequest::Unlink { pid, name, reply }) => {
                    let _ = reply.send(self.do_unlink(pid, &name));
                }
                Ok(ShmRequest::Page { shmid, reply }) => {
                    let result = self
                        .regions
                        .get(shmid)
                        .filter(|r| r.used)
                        .map(|r| r.page)
                        .ok_or(Errno::Einval);
                    let _ = reply.send(result);
                }
                Ok(ShmRequest::Connect { pid, inval }) => {
                    self.connections.push((pid, inval));
                }
                Ok(ShmRequest::Disconnect { pid }) => {
                    self.connections.retain(|(p, _)| *p != pid);
                }
                Ok(ShmRequest::Inval { shmid, requester }) => {
                    self.do_inval(shmid, requester);
                }
                Ok(ShmRequest::Exit) | Err(_) => {
                    tracing::info!("shm server exiting");
                    return;
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ShmClient {
    tx: Sender<ShmRequest>,
}

impl ShmClient {
    pub fn spawn_local(shm_max: usize, shm_name_max: usize, shm_size_max: usize, rmem: RmemClient) -> Self {
        let server = ShmServer::new(shm_max, shm_name_max, shm_size_max, rmem);
        let tx = server.inbox.sender();
        thread::spawn(move || server.run());
        Self { tx }
    }

    pub fn create(&self, pid: Pid, name: &str, oflags: OpenFlags, mode: Mode) -> Result<ShmId> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(ShmRequest::Create {
                pid,
                name: name.to_string(),
                oflags,
                mode,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn open(&self, pid: Pid, name: &str, oflags: OpenFlags) -> Result<ShmId> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(ShmRequest::Open {
                pid,
                name: name.to_string(),
                oflags,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn ftruncate(&self, shmid: ShmId, size: usize) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(ShmRequest::Ftruncate { shmid, size, reply })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn close(&self, shmid: ShmId) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(ShmRequest::Close { shmid, reply })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn unlink(&self, pid: Pid, name: &str) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(ShmRequest::Unlink {
                pid,
                name: name.to_string(),
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    fn page_of(&self, shmid: ShmId) -> Result<RPage> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(ShmRequest::Page { shmid, reply })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn connect(&self, pid: Pid) -> crossbeam_channel::Receiver<ShmId> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _ = self.tx.send(ShmRequest::Connect { pid, inval: tx });
        rx
    }

    pub fn disconnect(&self, pid: Pid) {
        let _ = self.tx.send(ShmRequest::Disconnect { pid });
    }

    pub fn inval(&self, shmid: ShmId, requester: Pid) {
        let _ = self.tx.send(ShmRequest::Inval { shmid, requester });
    }

    /// Reads the full region contents through RMEM, for clients that
    /// don't keep their own RCACHE.
    pub fn read(&self, rmem: &RmemClient, shmid: ShmId) -> Result<Vec<u8>> {
        let page = self.page_of(shmid)?;
        if page == NULL_PAGE {
            return Ok(Vec::new());
        }
        rmem.read(page)
    }

    pub fn write(&self, rmem: &RmemClient, pid: Pid, shmid: ShmId, data: Vec<u8>) -> Result<()> {
        let page = self.page_of(shmid)?;
        if page == NULL_PAGE {
            return Err(Errno::Efault);
        }
        rmem.write(pid, page, data)
    }

    pub fn exit(&self) {
        let _ = self.tx.send(ShmRequest::Exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RMEM_BLOCK_SIZE;

    fn setup() -> (ShmClient, RmemClient) {
        let rmem = RmemClient::spawn_local(0, 64);
        let shm = ShmClient::spawn_local(8, 32, RMEM_BLOCK_SIZE, rmem.clone());
        (shm, rmem)
    }

    #[test]
    fn shm_lifecycle_scenario() {
        // Scenario 3 from the design's testable-properties section.
        let (shm, rmem) = setup();
        let owner: Pid = 1;
        let other: Pid = 2;

        let shmid1 = shm
            .create(owner, "r", OpenFlags::O_CREAT, Mode::S_IWUSR)
            .unwrap();
        shm.ftruncate(shmid1, RMEM_BLOCK_SIZE).unwrap();
        shm.write(&rmem, owner, shmid1, vec![7u8; RMEM_BLOCK_SIZE]).unwrap();

        let shmid2 = shm.open(other, "r", OpenFlags::O_RDONLY).unwrap();
        assert_eq!(shmid2, shmid1);
        let buf = shm.read(&rmem, shmid2).unwrap();
        assert_eq!(buf, vec![7u8; RMEM_BLOCK_SIZE]);

        shm.unlink(owner, "r").unwrap();
        shm.close(shmid1).unwrap();
        shm.close(shmid2).unwrap();
        assert_eq!(shm.open(other, "r", OpenFlags::O_RDONLY), Err(Errno::Einval));
    }

    #[test]
    fn create_requires_o_creat_and_write_bit() {
        let (shm, _rmem) = setup();
        assert_eq!(
            shm.create(1, "x", OpenFlags::empty(), Mode::S_IWUSR),
            Err(Errno::Einval)
        );
        assert_eq!(
            shm.create(1, "x", OpenFlags::O_CREAT, Mode::S_IRUSR),
            Err(Errno::Eacces)
        );
    }

    #[test]
    fn o_excl_fails_on_existing_name() {
        let (shm, _rmem) = setup();
        shm.create(1, "x", OpenFlags::O_CREAT, Mode::S_IWUSR).unwrap();
        assert_eq!(
            shm.create(1, "x", OpenFlags::O_CREAT | OpenFlags::O_EXCL, Mode::S_IWUSR),
            Err(Errno::Eexist)
        );
    }

    #[test]
    fn ftruncate_beyond_size_max_is_efbig() {
        let (shm, _rmem) = setup();
        let shmid = shm.create(1, "x", OpenFlags::O_CREAT, Mode::S_IWUSR).unwrap();
        assert_eq!(shm.ftruncate(shmid, RMEM_BLOCK_SIZE + 1), Err(Errno::Efbig));
    }

    #[test]
    fn unlink_requires_ownership() {
        let (shm, _rmem) = setup();
        shm.create(1, "x", OpenFlags::O_CREAT, Mode::S_IWUSR).unwrap();
        assert_eq!(shm.unlink(2, "x"), Err(Errno::Eacces));
        shm.unlink(1, "x").unwrap();
    }

    #[test]
    fn close_is_idempotent_in_effect_once_unlinked() {
        let (shm, _rmem) = setup();
        let shmid = shm.create(1, "x", OpenFlags::O_CREAT, Mode::S_IWUSR).unwrap();
        shm.unlink(1, "x").unwrap();
        shm.close(shmid).unwrap();
        // A second close on a finalized slot reports Einval rather than
        // silently succeeding twice; the region is already gone.
        assert_eq!(shm.close(shmid), Err(Errno::Einval));
    }

    #[test]
    fn inval_reaches_other_connected_clients_only() {
        let (shm, _rmem) = setup();
        let shmid = shm.create(1, "x", OpenFlags::O_CREAT, Mode::S_IWUSR).unwrap();
        let rx_requester = shm.connect(1);
        let rx_other = shm.connect(2);
        shm.inval(shmid, 1);
        assert!(rx_other.recv_timeout(std::time::Duration::from_millis(200)).is_ok());
        assert!(rx_requester.try_recv().is_err());
    }
}
