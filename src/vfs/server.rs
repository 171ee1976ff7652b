//! VFS server request loop and client stub.
//!
//! Same shape as the RMEM and SHM servers: one inbox, one owned [`Vfs`],
//! no suspension within a request. `READ`/`WRITE` carry their payload over
//! a portal instead of inflating the mailbox message, exactly like RMEM's
//! block transfers.

use std::thread;

use crossbeam_channel::Sender;

use crate::error::{Errno, Result};
use crate::transport::{self, portal_read, portal_write, Mailbox, Portal, PortalRx, PortalTx};
use crate::vfs::file::{Fd, Identity, OpenFlags, Stat, Vfs, Whence};
use crate::vfs::minix::Minix;

enum VfsRequest {
    Creat {
        identity: Identity,
        path: String,
        mode: u16,
        now: u32,
        reply: Sender<Result<Fd>>,
    },
    Open {
        identity: Identity,
        path: String,
        oflag: OpenFlags,
        mode: u16,
        now: u32,
        reply: Sender<Result<Fd>>,
    },
    Unlink {
        identity: Identity,
        path: String,
        reply: Sender<Result<()>>,
    },
    Close {
        fd: Fd,
        reply: Sender<Result<()>>,
    },
    Link {
        old_path: String,
        new_path: String,
        reply: Sender<Result<()>>,
    },
    Truncate {
        path: String,
        length: u32,
        reply: Sender<Result<()>>,
    },
    Stat {
        path: String,
        reply: Sender<Result<Stat>>,
    },
    Read {
        fd: Fd,
        len: usize,
        ack: Sender<Result<usize>>,
        portal: PortalTx,
    },
    Write {
        fd: Fd,
        portal: PortalRx,
        reply: Sender<Result<usize>>,
    },
    Seek {
        fd: Fd,
        offset: i64,
        whence: Whence,
        reply: Sender<Result<u64>>,
    },
    Exit,
}

pub struct VfsServer {
    vfs: Vfs,
    inbox: Mailbox<VfsRequest>,
}

impl VfsServer {
    pub fn new(fs: Minix, nr_inodes: usize, nr_files: usize) -> Result<Self> {
        Ok(Self {
            vfs: Vfs::mount(fs, nr_inodes, nr_files)?,
            inbox: Mailbox::new(),
        })
    }

    /// Returns the data to ship over the portal alongside the status to
    /// ack, mirroring RMEM's read discipline: the portal transfer always
    /// completes, even on error, so the client never blocks forever.
    fn do_read(&mut self, fd: Fd, len: usize) -> (Vec<u8>, Result<usize>) {
        let mut buf = vec![0u8; len];
        match self.vfs.read(fd, &mut buf) {
            Ok(n) => (buf, Ok(n)),
            Err(e) => (vec![0u8; len], Err(e)),
        }
    }

    fn run(mut self) {
        loop {
            match self.inbox.read() {
                Ok(VfsRequest::Creat {
                    identity,
                    path,
                    mode,
                    now,
                    reply,
                }) => {
                    let oflag = OpenFlags::O_WRONLY | OpenFlags::O_CREAT | OpenFlags::O_TRUNC;
                    let _ = reply.send(self.vfs.open(&identity, &path, oflag, mode, now));
                }
                Ok(VfsRequest::Open {
                    identity,
                    path,
                    oflag,
                    mode,
                    now,
                    reply,
                }) => {
                    let _ = reply.send(self.vfs.open(&identity, &path, oflag, mode, now));
                }
                Ok(VfsRequest::Unlink { identity, path, reply }) => {
                    let _ = reply.send(self.vfs.unlink(&identity, &path));
                }
                Ok(VfsRequest::Close { fd, reply }) => {
                    let _ = reply.send(self.vfs.close(fd));
                }
                Ok(VfsRequest::Link {
                    old_path,
                    new_path,
                    reply,
                }) => {
                    let _ = reply.send(self.vfs.link(&old_path, &new_path));
                }
                Ok(VfsRequest::Truncate { path, length, reply }) => {
                    let _ = reply.send(self.vfs.truncate(&path, length));
                }
                Ok(VfsRequest::Stat { path, reply }) => {
                    let _ = reply.send(self.vfs.stat(&path));
                }
                Ok(VfsRequest::Read { fd, len, ack, portal }) => {
                    let (data, status) = self.do_read(fd, len);
                    let _ = ack.send(status);
                    let _ = portal_write(&portal, data);
                }
                Ok(VfsRequest::Write { fd, portal, reply }) => {
                    let data = portal_read(&portal).unwrap_or_default();
                    let _ = reply.send(self.vfs.write(fd, &data));
                }
                Ok(VfsRequest::Seek {
                    fd,
                    offset,
                    whence,
                    reply,
                }) => {
                    let _ = reply.send(self.vfs.lseek(fd, offset, whence));
                }
                Ok(VfsRequest::Exit) | Err(_) => {
                    tracing::info!("vfs server exiting");
                    return;
                }
            }
        }
    }
}

/// Client-side stub for the VFS server.
#[derive(Clone)]
pub struct VfsClient {
    tx: Sender<VfsRequest>,
}

impl VfsClient {
    pub fn spawn_local(fs: Minix, nr_inodes: usize, nr_files: usize) -> Result<Self> {
        let server = VfsServer::new(fs, nr_inodes, nr_files)?;
        let tx = server.inbox.sender();
        thread::spawn(move || server.run());
        Ok(Self { tx })
    }

    pub fn creat(&self, identity: Identity, path: &str, mode: u16, now: u32) -> Result<Fd> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Creat {
                identity,
                path: path.to_string(),
                mode,
                now,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn open(&self, identity: Identity, path: &str, oflag: OpenFlags, mode: u16, now: u32) -> Result<Fd> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Open {
                identity,
                path: path.to_string(),
                oflag,
                mode,
                now,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn unlink(&self, identity: Identity, path: &str) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Unlink {
                identity,
                path: path.to_string(),
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn close(&self, fd: Fd) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Close { fd, reply })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn link(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Link {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn truncate(&self, path: &str, length: u32) -> Result<()> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Truncate {
                path: path.to_string(),
                length,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Stat {
                path: path.to_string(),
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn read(&self, fd: Fd, len: usize) -> Result<Vec<u8>> {
        let (portal_tx, portal_rx) = Portal::open();
        let (ack_tx, ack_rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Read {
                fd,
                len,
                ack: ack_tx,
                portal: portal_tx,
            })
            .map_err(|_| Errno::Eagain)?;
        let n = transport::reply_wait(&ack_rx)??;
        let mut data = portal_read(&portal_rx)?;
        data.truncate(n);
        Ok(data)
    }

    pub fn write(&self, fd: Fd, data: Vec<u8>) -> Result<usize> {
        let (portal_tx, portal_rx) = Portal::open();
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Write {
                fd,
                portal: portal_rx,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        portal_write(&portal_tx, data)?;
        transport::reply_wait(&rx)?
    }

    pub fn seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let (reply, rx) = transport::reply_channel();
        self.tx
            .send(VfsRequest::Seek {
                fd,
                offset,
                whence,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        transport::reply_wait(&rx)?
    }

    pub fn exit(&self) {
        let _ = self.tx.send(VfsRequest::Exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::file::OpenFlags;

    fn setup() -> VfsClient {
        let fs = Minix::mkfs(2 * 1024 * 1024, 128, 32, 0, 0).unwrap();
        VfsClient::spawn_local(fs, 32, 16).unwrap()
    }

    fn root() -> Identity {
        Identity {
            uid: 0,
            gid: 0,
            is_superuser: true,
        }
    }

    #[test]
    fn create_write_read_unlink_round_trip_over_mailbox() {
        // Scenario 5, exercised through the server/mailbox layer.
        let vfs = setup();
        let id = root();
        let fd = vfs
            .open(id, "/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o600, 0)
            .unwrap();
        let payload = vec![9u8; 1024];
        assert_eq!(vfs.write(fd, payload.clone()).unwrap(), 1024);
        vfs.seek(fd, 0, Whence::Set).unwrap();
        let buf = vfs.read(fd, 1024).unwrap();
        assert_eq!(buf, payload);
        vfs.close(fd).unwrap();
        vfs.unlink(id, "/f").unwrap();
        assert_eq!(vfs.open(id, "/f", OpenFlags::O_RDONLY, 0, 0), Err(Errno::Enoent));
    }

    #[test]
    fn creat_truncates_existing_file() {
        let vfs = setup();
        let id = root();
        let fd = vfs.creat(id, "/g", 0o600, 0).unwrap();
        vfs.write(fd, vec![1u8; 16]).unwrap();
        vfs.close(fd).unwrap();
        let fd2 = vfs.creat(id, "/g", 0o600, 0).unwrap();
        let st = vfs.stat("/g").unwrap();
        assert_eq!(st.size, 0);
        vfs.close(fd2).unwrap();
    }

    #[test]
    fn link_then_unlink_original_keeps_data_reachable() {
        let vfs = setup();
        let id = root();
        let fd = vfs
            .open(id, "/orig", OpenFlags::O_CREAT | OpenFlags::O_RDWR, 0o600, 0)
            .unwrap();
        vfs.write(fd, b"hey".to_vec()).unwrap();
        vfs.close(fd).unwrap();
        vfs.link("/orig", "/alias").unwrap();
        vfs.unlink(id, "/orig").unwrap();
        let fd2 = vfs.open(id, "/alias", OpenFlags::O_RDONLY, 0, 0).unwrap();
        let buf = vfs.read(fd2, 3).unwrap();
        assert_eq!(buf, b"hey");
        vfs.close(fd2).unwrap();
    }

    #[test]
    fn exit_stops_the_server() {
        let vfs = setup();
        vfs.exit();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(vfs.stat("/"), Err(Errno::Eagain));
    }
}
