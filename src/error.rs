// SPDX-License-Identifier: MPL-2.0

//! The error taxonomy raised by this crate.
//!
//! This is a deliberately narrow restriction of a POSIX-style `Errno` to the
//! handful of kinds the pipe/socket/thread core actually raises (bad
//! argument, resource exhaustion, peer closed, timeout, state violation).

#![allow(dead_code)]

/// Error number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    /// Bad file number: the handle does not name a live record.
    EBADF = 9,
    /// No such process: the tid does not name a thread of the current process.
    ESRCH = 3,
    /// Invalid argument: out-of-range port, wrong role, null task, bad mode.
    EINVAL = 22,
    /// File table overflow: the process-wide handle table has no free slot.
    ENFILE = 23,
    /// Too many open files: a specific handle-reservation request can't be
    /// satisfied even though individual slots remain (e.g. two handles asked
    /// for atomically, only one free).
    EMFILE = 24,
    /// Broken pipe: the operation requires the opposite end to still be open.
    EPIPE = 32,
    /// Connect timed out before the listener admitted the request.
    ETIMEDOUT = 110,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.errno, msg),
            None => write!(f, "{:?}", self.errno),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

#[macro_export]
macro_rules! return_errno {
    ($errno:expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno:expr, $message:expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}
