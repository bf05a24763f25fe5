// SPDX-License-Identifier: MPL-2.0

//! Connection-oriented stream sockets built atop pipes: a three-role state
//! machine (Unbound, Listener, Peer) bound to an integer port, with a
//! port-indexed listener table and a FIFO accept/connect rendezvous.

mod listener;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub use listener::{ConnRequest, ListenerState};

use crate::pipe::{self, PipeReader, PipeWriter};
use crate::prelude::*;

/// Lowest valid port number.
pub const NOPORT: i32 = 0;
/// Default highest valid port number; a [`PortMap`] may be built with a
/// narrower range.
pub const MAX_PORT: i32 = 1023;

/// The role-exclusive payload of a socket control block. Reproduced as a
/// tagged variant (rather than the source's union-plus-tag) so a
/// role-mismatched access is a `match` arm, not a manual tag check.
enum Role {
    Unbound,
    Listener(Arc<ListenerState>),
    Peer {
        read_pipe: Arc<PipeReader>,
        write_pipe: Arc<PipeWriter>,
    },
}

/// `how` argument to [`Socket::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read,
    Write,
    Both,
}

/// A process-wide table mapping port numbers to the Listener socket bound
/// there. Writes occur only from `Listen` (claim) and listener `Close`
/// (release); at most one Listener may occupy a port at a time.
pub struct PortMap {
    max_port: i32,
    listeners: Mutex<BTreeMap<i32, Arc<Socket>>>,
}

impl PortMap {
    pub fn new(max_port: i32) -> Arc<Self> {
        Arc::new(Self {
            max_port,
            listeners: Mutex::new(BTreeMap::new()),
        })
    }

    fn validate_port(&self, port: i32) -> Result<()> {
        if port < NOPORT || port > self.max_port {
            return_errno_with_message!(Errno::EINVAL, "port out of range");
        }
        Ok(())
    }

    fn publish(&self, port: i32, socket: Arc<Socket>) -> Result<()> {
        let mut listeners = self.listeners.lock().unwrap();
        if listeners.contains_key(&port) {
            return_errno_with_message!(Errno::EINVAL, "port already has a listener");
        }
        listeners.insert(port, socket);
        Ok(())
    }

    /// Removes `socket` from `port`, but only if it is still the occupant
    /// (a socket that lost a race to reclaim the same port should not evict
    /// whoever holds it now).
    fn release(&self, port: i32, socket: &Socket) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(existing) = listeners.get(&port) {
            if std::ptr::eq(existing.as_ref(), socket) {
                listeners.remove(&port);
            }
        }
    }

    fn get_listener(&self, port: i32) -> Result<Arc<Socket>> {
        self.validate_port(port)?;
        self.listeners
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .ok_or(Error::with_message(Errno::EINVAL, "no listener at that port"))
    }

    fn is_listener_at(&self, port: i32, socket: &Arc<Socket>) -> bool {
        self.listeners
            .lock()
            .unwrap()
            .get(&port)
            .map(|s| Arc::ptr_eq(s, socket))
            .unwrap_or(false)
    }
}

/// A socket control block.
pub struct Socket {
    port: i32,
    role: Mutex<Role>,
    port_map: Arc<PortMap>,
}

impl Socket {
    /// `Socket(port)`: validates the port range, allocates an Unbound SCB.
    /// Deliberately does **not** touch the port map — binding happens only
    /// in [`Socket::listen`]. This closes the fragility noted against the
    /// original source, where a bare `Socket()` call could silently publish
    /// into an empty port-map slot.
    pub fn new(port: i32, port_map: Arc<PortMap>) -> Result<Arc<Self>> {
        port_map.validate_port(port)?;
        Ok(Arc::new(Self {
            port,
            role: Mutex::new(Role::Unbound),
            port_map,
        }))
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    /// `Listen(sock)`.
    pub fn listen(self: &Arc<Self>) -> Result<()> {
        let mut role = self.role.lock().unwrap();
        if !matches!(&*role, Role::Unbound) {
            return_errno_with_message!(Errno::EINVAL, "socket is not unbound");
        }
        self.port_map.publish(self.port, self.clone())?;
        *role = Role::Listener(Arc::new(ListenerState::new()));
        debug!("socket: port {} now listening", self.port);
        Ok(())
    }

    /// `Accept(lsock)`.
    pub fn accept(self: &Arc<Self>) -> Result<Arc<Socket>> {
        let listener_state = {
            let role = self.role.lock().unwrap();
            match &*role {
                Role::Listener(state) => state.clone(),
                _ => return_errno_with_message!(Errno::EINVAL, "socket is not a listener"),
            }
        };

        let mut queue = listener_state.queue.lock().unwrap();
        loop {
            if let Some(request) = queue.pop_front() {
                drop(queue);
                return self.admit(request);
            }
            if !self.port_map.is_listener_at(self.port, self) {
                return_errno_with_message!(Errno::EINVAL, "listener was closed");
            }
            queue = listener_state.req_arrived.wait(queue).unwrap();
        }
    }

    /// Completes one accepted connection: builds the accepting-side SCB and
    /// two fresh pipes with swapped orientation, installs both roles, and
    /// wakes the requester.
    fn admit(self: &Arc<Self>, request: Arc<ConnRequest>) -> Result<Arc<Socket>> {
        let accepted = Socket::new(self.port, self.port_map.clone())?;

        // pipe1: read=requester, write=accepted.
        let (req_reads, acc_writes) = pipe::new_pair();
        // pipe2: read=accepted, write=requester.
        let (acc_reads, req_writes) = pipe::new_pair();

        *request.requester.role.lock().unwrap() = Role::Peer {
            read_pipe: Arc::new(req_reads),
            write_pipe: Arc::new(req_writes),
        };
        *accepted.role.lock().unwrap() = Role::Peer {
            read_pipe: Arc::new(acc_reads),
            write_pipe: Arc::new(acc_writes),
        };

        request.state.lock().unwrap().admitted = true;
        request.admit_cv.notify_all();
        debug!("socket: admitted a connection on port {}", self.port);
        Ok(accepted)
    }

    /// `Connect(sock, port, timeout)`. `timeout` of `None` waits indefinitely.
    pub fn connect(self: &Arc<Self>, port: i32, timeout: Option<Duration>) -> Result<()> {
        {
            let role = self.role.lock().unwrap();
            if !matches!(&*role, Role::Unbound) {
                return_errno_with_message!(Errno::EINVAL, "socket is not unbound");
            }
        }

        let listener = self.port_map.get_listener(port)?;
        let listener_state = {
            let role = listener.role.lock().unwrap();
            match &*role {
                Role::Listener(state) => state.clone(),
                _ => return_errno_with_message!(Errno::EINVAL, "port has no listener"),
            }
        };

        let request = Arc::new(ConnRequest::new(self.clone()));
        listener_state.queue.lock().unwrap().push_back(request.clone());
        listener_state.req_arrived.notify_all();

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = request.state.lock().unwrap();
        loop {
            if guard.admitted {
                break;
            }
            guard = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(guard);
                        excise(&listener_state, &request);
                        warn!("socket: connect to port {} timed out", port);
                        return_errno_with_message!(Errno::ETIMEDOUT, "connect timed out");
                    }
                    request.admit_cv.wait_timeout(guard, deadline - now).unwrap().0
                }
                None => request.admit_cv.wait(guard).unwrap(),
            };
            if !guard.admitted && !self.port_map.is_listener_at(port, &listener) {
                drop(guard);
                excise(&listener_state, &request);
                warn!(
                    "socket: listener on port {} closed while a connect was still queued",
                    port
                );
                return_errno_with_message!(Errno::EINVAL, "listener closed before admission");
            }
        }
        Ok(())
    }

    /// Peer-only read; delegates to the directional pipe.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match &*self.role.lock().unwrap() {
            Role::Peer { read_pipe, .. } => read_pipe.read(buf),
            _ => return_errno_with_message!(Errno::EINVAL, "read on a non-peer socket"),
        }
    }

    /// Peer-only write; delegates to the directional pipe.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        match &*self.role.lock().unwrap() {
            Role::Peer { write_pipe, .. } => write_pipe.write(buf),
            _ => return_errno_with_message!(Errno::EINVAL, "write on a non-peer socket"),
        }
    }

    /// `ShutDown(sock, how)`.
    pub fn shutdown(&self, how: ShutdownMode) -> Result<()> {
        match &*self.role.lock().unwrap() {
            Role::Peer {
                read_pipe,
                write_pipe,
            } => {
                match how {
                    ShutdownMode::Read => read_pipe.close(),
                    ShutdownMode::Write => write_pipe.close(),
                    ShutdownMode::Both => {
                        read_pipe.close();
                        write_pipe.close();
                    }
                }
                Ok(())
            }
            _ => return_errno_with_message!(Errno::EINVAL, "shutdown is valid only on a peer"),
        }
    }

    /// `Close(sock)`.
    pub fn close(&self) -> Result<()> {
        let listener_state = {
            let role = self.role.lock().unwrap();
            match &*role {
                Role::Peer {
                    read_pipe,
                    write_pipe,
                } => {
                    read_pipe.close();
                    write_pipe.close();
                    return Ok(());
                }
                Role::Unbound => return Ok(()),
                Role::Listener(state) => state.clone(),
            }
        };
        self.port_map.release(self.port, self);
        let queue = listener_state.queue.lock().unwrap();
        for request in queue.iter() {
            // Wake any connecter still parked on this request so it does not
            // have to wait out its full timeout once the listener is gone.
            request.admit_cv.notify_all();
        }
        drop(queue);
        listener_state.req_arrived.notify_all();
        debug!("socket: listener on port {} closed", self.port);
        Ok(())
    }
}

fn excise(listener_state: &ListenerState, request: &Arc<ConnRequest>) {
    listener_state
        .queue
        .lock()
        .unwrap()
        .retain(|queued| !Arc::ptr_eq(queued, request));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn echo_both_directions() {
        let port_map = PortMap::new(MAX_PORT);
        let listener = Socket::new(100, port_map.clone()).unwrap();
        listener.listen().unwrap();

        let connector_map = port_map.clone();
        let connect_thread = thread::spawn(move || {
            let client = Socket::new(100, connector_map).unwrap();
            client.connect(100, None).unwrap();
            client.write(b"ping").unwrap();
            let mut buf = [0u8; 4];
            let n = client.read(&mut buf).unwrap();
            assert_eq!(n, 4);
            assert_eq!(&buf, b"pong");
        });

        let accepted = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        let n = accepted.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"ping");
        accepted.write(b"pong").unwrap();

        connect_thread.join().unwrap();
    }

    #[test]
    fn connect_without_listener_times_out() {
        let port_map = PortMap::new(MAX_PORT);
        // No listener published at port 100.
        let dangling_listener = Socket::new(100, port_map.clone()).unwrap();
        dangling_listener.listen().unwrap();
        dangling_listener.close().unwrap();

        let client = Socket::new(100, port_map).unwrap();
        let start = Instant::now();
        let err = client.connect(100, Some(Duration::from_millis(50)));
        assert!(err.is_err());
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn fifo_admission_order() {
        let port_map = PortMap::new(MAX_PORT);
        let listener = Socket::new(100, port_map.clone()).unwrap();
        listener.listen().unwrap();

        let map_a = port_map.clone();
        let a = thread::spawn(move || {
            let s = Socket::new(100, map_a).unwrap();
            s.connect(100, None).unwrap();
            s.write(b"A").unwrap();
        });
        // Give A a head start so it is first in the queue.
        thread::sleep(Duration::from_millis(20));
        let map_b = port_map.clone();
        let b = thread::spawn(move || {
            let s = Socket::new(100, map_b).unwrap();
            s.connect(100, None).unwrap();
            s.write(b"B").unwrap();
        });

        let first = listener.accept().unwrap();
        let mut buf = [0u8; 1];
        first.read(&mut buf).unwrap();
        assert_eq!(&buf, b"A");

        let second = listener.accept().unwrap();
        second.read(&mut buf).unwrap();
        assert_eq!(&buf, b"B");

        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn double_listen_same_port_fails() {
        let port_map = PortMap::new(MAX_PORT);
        let first = Socket::new(100, port_map.clone()).unwrap();
        first.listen().unwrap();
        let second = Socket::new(100, port_map).unwrap();
        assert!(second.listen().is_err());
    }

    #[test]
    fn read_write_on_non_peer_errors() {
        let port_map = PortMap::new(MAX_PORT);
        let sock = Socket::new(100, port_map).unwrap();
        let mut buf = [0u8; 1];
        assert!(sock.read(&mut buf).is_err());
        assert!(sock.write(&buf).is_err());
    }
}
