//! Mailbox and portal transport primitives.
//!
//! The hardware NoC drivers and DMA setup behind the real mailbox/portal
//! API are out of scope for this core; what every engine above it needs
//! is the two properties the transport guarantees: a mailbox carries small
//! fixed headers in arrival order, and a portal carries one bulk payload
//! per rendezvous. [`Mailbox`] and [`Portal`] below give exactly that,
//! built on `crossbeam_channel`, so the servers in this crate can run as
//! ordinary threads instead of NoC-attached processes.

use crossbeam_channel::{Receiver, Sender};

use crate::error::Errno;

/// A server's inbox: many clients hold a clone of the sending half, the
/// server owns the receiving half and reads requests off it in arrival
/// order, exactly as the single-threaded event loop in every server here
/// assumes.
pub struct Mailbox<M> {
    tx: Sender<M>,
    rx: Receiver<M>,
}

impl<M> Mailbox<M> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// A clonable handle a client uses to `mailbox_write` into this inbox.
    pub fn sender(&self) -> Sender<M> {
        self.tx.clone()
    }

    /// Blocks until the next request arrives, or returns `Eagain` if every
    /// sender has been dropped and the mailbox can never receive again.
    pub fn read(&self) -> Result<M, Errno> {
        self.rx.recv().map_err(|_| Errno::Eagain)
    }
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn mailbox_write<M>(mb: &Sender<M>, msg: M) -> Result<(), Errno> {
    mb.send(msg).map_err(|_| Errno::Eagain)
}

/// A one-shot bulk transfer. The receiving side `portal_allow`s (i.e.
/// constructs the pair) before the mailbox ACK that announces the
/// transfer is coming; the sending side `portal_write`s the payload once
/// it is ready, and the receiver `portal_read`s it.
pub struct Portal;

pub type PortalTx = Sender<Vec<u8>>;
pub type PortalRx = Receiver<Vec<u8>>;

impl Portal {
    /// `portal_open`/`portal_allow`: establishes a rendezvous pair for one
    /// bulk transfer.
    pub fn open() -> (PortalTx, PortalRx) {
        crossbeam_channel::bounded(1)
    }
}

pub fn portal_write(tx: &PortalTx, data: Vec<u8>) -> Result<(), Errno> {
    tx.send(data).map_err(|_| Errno::Eagain)
}

pub fn portal_read(rx: &PortalRx) -> Result<Vec<u8>, Errno> {
    rx.recv().map_err(|_| Errno::Eagain)
}

/// A single-use reply channel: the client-side half of a mailbox
/// exchange, used so the server can address a response directly back to
/// the requester without a shared reply inbox.
pub fn reply_channel<R>() -> (Sender<R>, Receiver<R>) {
    crossbeam_channel::bounded(1)
}

pub fn reply_wait<R>(rx: &Receiver<R>) -> Result<R, Errno> {
    rx.recv().map_err(|_| Errno::Eagain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_preserves_arrival_order() {
        let mb: Mailbox<u32> = Mailbox::new();
        let tx = mb.sender();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(mb.read().unwrap(), 1);
        assert_eq!(mb.read().unwrap(), 2);
        assert_eq!(mb.read().unwrap(), 3);
    }

    #[test]
    fn portal_two_stage_handshake() {
        let (ptx, prx) = Portal::open();
        portal_write(&ptx, vec![1, 2, 3]).unwrap();
        assert_eq!(portal_read(&prx).unwrap(), vec![1, 2, 3]);
    }
}
