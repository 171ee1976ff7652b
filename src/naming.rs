//! Name service client.
//!
//! Every server in this crate links a well-known name with the name
//! service at startup and clients resolve that name to a `(node, port)`
//! pair before ever talking to the server itself. The name service's own
//! implementation is a tiny single-threaded actor, the same shape as every
//! other server in this core, so tests can spin one up in-process instead
//! of stubbing it out.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use crate::error::{Errno, Result};
use crate::message::{NodeId, PortId};
use crate::transport::{reply_channel, reply_wait, Mailbox};

pub const PROC_NAME_MAX: usize = 32;

enum NameRequest {
    Link {
        name: String,
        node: NodeId,
        port: PortId,
        reply: Sender<Result<()>>,
    },
    Unlink {
        name: String,
        reply: Sender<Result<()>>,
    },
    Lookup {
        name: String,
        reply: Sender<Result<(NodeId, PortId)>>,
    },
    Alive {
        timestamp: u64,
    },
    Exit,
}

/// The server side: owns the name table and runs the request loop.
pub struct NameServer {
    table: HashMap<String, (NodeId, PortId)>,
    inbox: Mailbox<NameRequest>,
}

impl NameServer {
    fn validate(name: &str) -> Result<()> {
        if name.is_empty() || name.len() >= PROC_NAME_MAX {
            return Err(Errno::Enametoolong);
        }
        Ok(())
    }

    fn run(mut self) {
        loop {
            match self.inbox.read() {
                Ok(NameRequest::Link {
                    name,
                    node,
                    port,
                    reply,
                }) => {
                    let result = Self::validate(&name).and_then(|()| {
                        if self.table.contains_key(&name) {
                            Err(Errno::Eexist)
                        } else {
                            self.table.insert(name, (node, port));
                            Ok(())
                        }
                    });
                    let _ = reply.send(result);
                }
                Ok(NameRequest::Unlink { name, reply }) => {
                    let result = if self.table.remove(&name).is_some() {
                        Ok(())
                    } else {
                        Err(Errno::Enoent)
                    };
                    let _ = reply.send(result);
                }
                Ok(NameRequest::Lookup { name, reply }) => {
                    let result = self.table.get(&name).copied().ok_or(Errno::Enoent);
                    let _ = reply.send(result);
                }
                Ok(NameRequest::Alive { timestamp }) => {
                    tracing::trace!(timestamp, "name service heartbeat");
                }
                Ok(NameRequest::Exit) | Err(_) => {
                    tracing::info!("name service exiting");
                    return;
                }
            }
        }
    }
}

/// A handle clients use to talk to a running [`NameServer`].
#[derive(Clone)]
pub struct NameClient {
    tx: Sender<NameRequest>,
}

impl NameClient {
    /// Spawns the name service on its own thread and returns a client
    /// handle plus a join handle for orderly shutdown.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let server = NameServer {
            table: HashMap::new(),
            inbox: Mailbox::new(),
        };
        let tx = server.inbox.sender();
        let handle = thread::spawn(move || server.run());
        (Self { tx }, handle)
    }

    pub fn link(&self, name: &str, node: NodeId, port: PortId) -> Result<()> {
        let (reply, rx) = reply_channel();
        self.tx
            .send(NameRequest::Link {
                name: name.to_string(),
                node,
                port,
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        reply_wait(&rx)?
    }

    pub fn unlink(&self, name: &str) -> Result<()> {
        let (reply, rx) = reply_channel();
        self.tx
            .send(NameRequest::Unlink {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        reply_wait(&rx)?
    }

    pub fn lookup(&self, name: &str) -> Result<(NodeId, PortId)> {
        let (reply, rx) = reply_channel();
        self.tx
            .send(NameRequest::Lookup {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| Errno::Eagain)?;
        reply_wait(&rx)?
    }

    pub fn alive(&self, timestamp: u64) {
        let _ = self.tx.send(NameRequest::Alive { timestamp });
    }

    pub fn exit(&self) {
        let _ = self.tx.send(NameRequest::Exit);
    }
}

/// Convenience: a name service shared by every server spawned in one
/// process, as used by the demo binary and by integration tests that
/// stand up the whole core.
pub fn spawn_shared() -> (Arc<NameClient>, JoinHandle<()>) {
    let (client, handle) = NameClient::spawn();
    (Arc::new(client), handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_lookup_unlink_round_trip() {
        let (client, handle) = NameClient::spawn();
        client.link("/rmem0", 1, 42).unwrap();
        assert_eq!(client.lookup("/rmem0").unwrap(), (1, 42));
        client.unlink("/rmem0").unwrap();
        assert_eq!(client.lookup("/rmem0"), Err(Errno::Enoent));
        client.exit();
        handle.join().unwrap();
    }

    #[test]
    fn link_rejects_duplicate_name() {
        let (client, handle) = NameClient::spawn();
        client.link("/dup", 0, 1).unwrap();
        assert_eq!(client.link("/dup", 0, 2), Err(Errno::Eexist));
        client.exit();
        handle.join().unwrap();
    }

    #[test]
    fn overlong_name_is_rejected() {
        let (client, handle) = NameClient::spawn();
        let long_name = "a".repeat(PROC_NAME_MAX);
        assert_eq!(client.link(&long_name, 0, 1), Err(Errno::Enametoolong));
        client.exit();
        handle.join().unwrap();
    }
}
