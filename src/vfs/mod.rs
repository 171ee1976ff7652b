//! MINIX-layout VFS server: block cache, on-disk structures, in-memory
//! inode table, the POSIX-ish file layer, and the mailbox-actor wrapper
//! around all of it.

mod bcache;
mod file;
mod inode;
mod minix;
mod server;

pub use bcache::{BlockCache, BufHandle, Disk};
pub use file::{has_permissions, Fd, Identity, OpenFlags, Stat, Vfs, Whence};
pub use inode::InodeTable;
pub use minix::Minix;
pub use server::{VfsClient, VfsServer};
