// SPDX-License-Identifier: MPL-2.0

//! The syscall-shaped facade: one [`Kernel`] instance owns the process
//! table and the port map, and resolves "the calling thread's current
//! process" for every operation that implicitly needs it — the way a real
//! kernel's syscall entry points read `current!()` rather than taking a
//! process handle as an argument.

use std::time::Duration;

use crate::handle::{FileEndpoint, Handle};
use crate::pipe;
use crate::prelude::*;
use crate::process::{Pid, Process, ProcessTable};
use crate::socket::{PortMap, ShutdownMode, Socket};
use crate::thread::{self, Tid};

/// Tunables a kernel instance is built with, standing in for the
/// compile-time constants a real kernel would bake into its image.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Highest valid socket port number (inclusive).
    pub max_port: i32,
    /// Per-process handle table capacity.
    pub max_handles: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_port: crate::socket::MAX_PORT,
            max_handles: 64,
        }
    }
}

/// Owns the process table and port map backing every syscall below.
/// Constructing one does not itself create a process — call
/// [`Kernel::spawn_init`] first, from whatever OS thread should become
/// pid 1, then [`Kernel::spawn_process`] for everything after.
pub struct Kernel {
    config: KernelConfig,
    processes: Arc<ProcessTable>,
    ports: Arc<PortMap>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            processes: ProcessTable::new(),
            ports: PortMap::new(config.max_port),
            config,
        }
    }

    pub fn config(&self) -> KernelConfig {
        self.config
    }

    /// Creates the init process (pid 1) and binds the calling OS thread to
    /// it as its main thread. Must be called exactly once, before any
    /// other `Kernel` method, from the thread meant to act as init.
    pub fn spawn_init(&self) -> Arc<Process> {
        let init = self.processes.spawn(None, self.config.max_handles);
        init.bootstrap_main_thread();
        init
    }

    /// Creates a new process parented to the calling thread's current
    /// process, and binds the calling OS thread to it as the new
    /// process's main thread — the calling thread now belongs to the
    /// child, mirroring a `fork`-without-copy creation model.
    pub fn spawn_process(&self) -> Arc<Process> {
        let parent = thread::current_process();
        self.spawn_child_of(&parent)
    }

    /// Like [`Kernel::spawn_process`], but takes the parent explicitly
    /// instead of resolving it from the calling thread's own current
    /// process — for bootstrapping a process on a fresh OS thread that
    /// does not yet belong to one (e.g. a dedicated supervisor thread).
    pub fn spawn_child_of(&self, parent: &Arc<Process>) -> Arc<Process> {
        let child = self.processes.spawn(Some(parent), self.config.max_handles);
        child.bootstrap_main_thread();
        child
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.get(pid)
    }

    /// `Pipe()`: creates a pipe and installs both ends as handles in the
    /// calling thread's process.
    pub fn pipe(&self) -> Result<(Handle, Handle)> {
        let (reader, writer) = pipe::new_pair();
        let process = thread::current_process();
        let mut table = process.handle_table().lock().unwrap();
        let handles = table.insert_many(vec![
            FileEndpoint::PipeReader(Arc::new(reader)),
            FileEndpoint::PipeWriter(Arc::new(writer)),
        ])?;
        Ok((handles[0], handles[1]))
    }

    /// `Socket(port)`: creates an unbound socket and installs it as a
    /// handle in the calling thread's process.
    pub fn socket(&self, port: i32) -> Result<Handle> {
        let socket = Socket::new(port, self.ports.clone())?;
        let process = thread::current_process();
        process
            .handle_table()
            .lock()
            .unwrap()
            .insert(FileEndpoint::Socket(socket))
    }

    fn socket_at(&self, handle: Handle) -> Result<Arc<Socket>> {
        match thread::current_process().handle_table().lock().unwrap().get(handle)? {
            FileEndpoint::Socket(socket) => Ok(socket),
            _ => return_errno_with_message!(Errno::EBADF, "handle is not a socket"),
        }
    }

    pub fn listen(&self, handle: Handle) -> Result<()> {
        self.socket_at(handle)?.listen()
    }

    /// `Accept(lsock)`: on success, installs the accepted socket as a new
    /// handle in the calling thread's process and returns it.
    pub fn accept(&self, handle: Handle) -> Result<Handle> {
        let accepted = self.socket_at(handle)?.accept()?;
        thread::current_process()
            .handle_table()
            .lock()
            .unwrap()
            .insert(FileEndpoint::Socket(accepted))
    }

    pub fn connect(&self, handle: Handle, port: i32, timeout: Option<Duration>) -> Result<()> {
        self.socket_at(handle)?.connect(port, timeout)
    }

    pub fn shutdown(&self, handle: Handle, how: ShutdownMode) -> Result<()> {
        self.socket_at(handle)?.shutdown(how)
    }

    /// Reads from a pipe-reader or peer-socket handle.
    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        match thread::current_process().handle_table().lock().unwrap().get(handle)? {
            FileEndpoint::PipeReader(reader) => reader.read(buf),
            FileEndpoint::Socket(socket) => socket.read(buf),
            FileEndpoint::PipeWriter(_) => {
                return_errno_with_message!(Errno::EBADF, "handle is write-only")
            }
        }
    }

    /// Writes to a pipe-writer or peer-socket handle.
    pub fn write(&self, handle: Handle, buf: &[u8]) -> Result<usize> {
        match thread::current_process().handle_table().lock().unwrap().get(handle)? {
            FileEndpoint::PipeWriter(writer) => writer.write(buf),
            FileEndpoint::Socket(socket) => socket.write(buf),
            FileEndpoint::PipeReader(_) => {
                return_errno_with_message!(Errno::EBADF, "handle is read-only")
            }
        }
    }

    /// Closes a handle, releasing it from the calling thread's process.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let endpoint = thread::current_process()
            .handle_table()
            .lock()
            .unwrap()
            .remove(handle)?;
        endpoint.close();
        Ok(())
    }

    pub fn create_thread(&self, task: impl FnOnce() -> i32 + Send + 'static) -> Result<Tid> {
        thread::current_process().create_thread(task)
    }

    pub fn thread_join(&self, tid: Tid) -> Result<i32> {
        thread::current_process().thread_join(tid)
    }

    pub fn thread_detach(&self, tid: Tid) -> Result<()> {
        thread::current_process().thread_detach(tid)
    }

    pub fn thread_self(&self) -> Tid {
        thread::thread_self()
    }

    /// `ThreadExit(exitval)`. Diverges: the calling OS thread never
    /// returns from this call.
    pub fn thread_exit(&self, exit_value: i32) -> ! {
        thread::thread_exit(exit_value)
    }
}
