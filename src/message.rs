//! Wire format shared by every request/response exchanged with a server.
//!
//! Every message begins with a fixed [`Header`] followed by an
//! opcode-specific payload. The two together must fit in
//! [`crate::config::MAILBOX_MESSAGE_SIZE`] bytes; data-bearing operations
//! carry their bulk payload over a separate portal transfer instead of
//! inflating the mailbox message.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::MAILBOX_MESSAGE_SIZE;
use crate::error::Errno;

pub type NodeId = u16;
pub type PortId = u16;
pub type Pid = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Header {
    pub source_node: NodeId,
    pub mailbox_port: PortId,
    pub portal_port: PortId,
    pub opcode: u8,
    pub seq: u32,
}

/// A request or response, tagged with the header and carrying a
/// server-specific payload `P`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub header: Header,
    pub payload: P,
}

impl<P: Serialize> Envelope<P> {
    /// Serializes to the exact bytes that would cross the wire, and checks
    /// the result fits in one mailbox message.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let bytes = bincode::serialize(self).expect("envelope is always serializable");
        debug_assert!(
            bytes.len() <= MAILBOX_MESSAGE_SIZE,
            "message {} exceeds MAILBOX_MESSAGE_SIZE ({} > {})",
            std::any::type_name::<P>(),
            bytes.len(),
            MAILBOX_MESSAGE_SIZE
        );
        bytes
    }
}

impl<P: DeserializeOwned> Envelope<P> {
    pub fn from_wire_bytes(bytes: &[u8]) -> Self {
        bincode::deserialize(bytes).expect("malformed envelope on the wire")
    }
}

/// A `FAIL` response body: every server replies with this shape on error
/// instead of its normal success payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FailBody {
    pub status: ErrnoWire,
}

/// [`Errno`] is not itself serializable without picking a representation;
/// this is that representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum ErrnoWire {
    Einval,
    Enomem,
    Enospc,
    Enfile,
    Enoent,
    Eexist,
    Eacces,
    Ebusy,
    Efault,
    Eagain,
    Ebadf,
    Efbig,
    Enametoolong,
    Enotsup,
    Espipe,
}

impl From<Errno> for ErrnoWire {
    fn from(e: Errno) -> Self {
        match e {
            Errno::Einval => ErrnoWire::Einval,
            Errno::Enomem => ErrnoWire::Enomem,
            Errno::Enospc => ErrnoWire::Enospc,
            Errno::Enfile => ErrnoWire::Enfile,
            Errno::Enoent => ErrnoWire::Enoent,
            Errno::Eexist => ErrnoWire::Eexist,
            Errno::Eacces => ErrnoWire::Eacces,
            Errno::Ebusy => ErrnoWire::Ebusy,
            Errno::Efault => ErrnoWire::Efault,
            Errno::Eagain => ErrnoWire::Eagain,
            Errno::Ebadf => ErrnoWire::Ebadf,
            Errno::Efbig => ErrnoWire::Efbig,
            Errno::Enametoolong => ErrnoWire::Enametoolong,
            Errno::Enotsup => ErrnoWire::Enotsup,
            Errno::Espipe => ErrnoWire::Espipe,
        }
    }
}

impl From<ErrnoWire> for Errno {
    fn from(e: ErrnoWire) -> Self {
        match e {
            ErrnoWire::Einval => Errno::Einval,
            ErrnoWire::Enomem => Errno::Enomem,
            ErrnoWire::Enospc => Errno::Enospc,
            ErrnoWire::Enfile => Errno::Enfile,
            ErrnoWire::Enoent => Errno::Enoent,
            ErrnoWire::Eexist => Errno::Eexist,
            ErrnoWire::Eacces => Errno::Eacces,
            ErrnoWire::Ebusy => Errno::Ebusy,
            ErrnoWire::Efault => Errno::Efault,
            ErrnoWire::Eagain => Errno::Eagain,
            ErrnoWire::Ebadf => Errno::Ebadf,
            ErrnoWire::Efbig => Errno::Efbig,
            ErrnoWire::Enametoolong => Errno::Enametoolong,
            ErrnoWire::Enotsup => Errno::Enotsup,
            ErrnoWire::Espipe => Errno::Espipe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping(u32);

    #[test]
    fn envelope_round_trips_over_the_wire() {
        let env = Envelope {
            header: Header {
                source_node: 1,
                mailbox_port: 2,
                portal_port: 3,
                opcode: 7,
                seq: 42,
            },
            payload: Ping(99),
        };
        let bytes = env.to_wire_bytes();
        let back: Envelope<Ping> = Envelope::from_wire_bytes(&bytes);
        assert_eq!(back.header, env.header);
        assert_eq!(back.payload, env.payload);
    }

    #[test]
    fn errno_wire_round_trips() {
        for e in [Errno::Einval, Errno::Efault, Errno::Espipe] {
            let wire: ErrnoWire = e.into();
            let back: Errno = wire.into();
            assert_eq!(e, back);
        }
    }
}
