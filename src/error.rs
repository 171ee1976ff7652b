//! Error taxonomy shared by every server and client stub in the core.
//!
//! Every fallible operation in this crate returns `Result<T>` with this
//! `Errno` as its error type, mirroring the negative-integer errno
//! convention of the underlying transport: a server never panics on a
//! client mistake, it replies with one of these and the client turns it
//! back into a `Result` at the stub boundary.

use thiserror::Error;

/// The fixed set of error kinds a server may report to a client.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum Errno {
    #[error("invalid argument")]
    Einval,
    #[error("out of memory")]
    Enomem,
    #[error("no space left")]
    Enospc,
    #[error("file table overflow")]
    Enfile,
    #[error("no such entry")]
    Enoent,
    #[error("entry already exists")]
    Eexist,
    #[error("permission denied")]
    Eacces,
    #[error("resource busy")]
    Ebusy,
    #[error("bad page handle")]
    Efault,
    #[error("resource temporarily unavailable")]
    Eagain,
    #[error("bad file descriptor")]
    Ebadf,
    #[error("file too large")]
    Efbig,
    #[error("name too long")]
    Enametoolong,
    #[error("operation not supported")]
    Enotsup,
    #[error("illegal seek")]
    Espipe,
}

pub type Result<T> = std::result::Result<T, Errno>;
