//! `mkcore`: the distributed memory and storage core for a microkernel-
//! style runtime.
//!
//! Four cooperating pieces, each a single-threaded request-loop actor
//! talking mailbox-and-portal:
//!
//! - [`rmem`]: remote-memory page servers, the backing store everything
//!   else is built on.
//! - [`rcache`]: a client-side write-back cache fronting RMEM.
//! - [`shm`]: a name-to-page directory multiplexing named shared regions
//!   onto RMEM pages.
//! - [`vfs`]: a MINIX-layout file system server built on its own private
//!   block cache, independent of RMEM/RCACHE.
//!
//! [`naming`] ties well-known names to `(node, port)` pairs so clients
//! never hardcode which server thread backs a given service.

pub mod bitmap;
pub mod config;
pub mod error;
pub mod message;
pub mod naming;
pub mod rcache;
pub mod rmem;
pub mod shm;
pub mod transport;
pub mod vfs;

pub use error::{Errno, Result};
