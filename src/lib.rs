// SPDX-License-Identifier: MPL-2.0

//! The inter-thread/inter-process communication core of a small teaching
//! operating-system kernel: anonymous pipes, connection-oriented stream
//! sockets, and per-process thread lifecycle (create/join/detach/exit),
//! all built on per-record `Mutex`/`Condvar` pairs rather than a single
//! coarse kernel lock.
//!
//! [`kernel::Kernel`] is the intended entry point: it owns the process
//! table and port map and exposes the system-call surface. The lower
//! modules ([`pipe`], [`socket`], [`thread`], [`process`]) are public so
//! they can be driven directly in tests without going through a process.

pub mod error;
pub mod handle;
pub mod kernel;
pub mod pipe;
pub mod process;
pub mod socket;
pub mod thread;

mod prelude;
