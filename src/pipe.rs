// SPDX-License-Identifier: MPL-2.0

//! Anonymous byte pipes: a single-producer/single-consumer bounded ring
//! buffer with blocking read/write and independent reader/writer close.

use std::sync::{Condvar, Mutex};

use crate::prelude::*;

/// Size of the ring buffer. One byte of capacity is sacrificed to
/// distinguish the empty state from the full state.
pub const PIPE_BUFFER_SIZE: usize = 4096;

struct PipeState {
    buf: Box<[u8; PIPE_BUFFER_SIZE]>,
    r: usize,
    w: usize,
    reader_open: bool,
    writer_open: bool,
}

impl PipeState {
    fn is_empty(&self) -> bool {
        self.r == self.w
    }

    fn is_full(&self) -> bool {
        (self.w + 1) % PIPE_BUFFER_SIZE == self.r
    }
}

struct PipeShared {
    state: Mutex<PipeState>,
    has_space: Condvar,
    has_data: Condvar,
}

impl PipeShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipeState {
                buf: Box::new([0u8; PIPE_BUFFER_SIZE]),
                r: 0,
                w: 0,
                reader_open: true,
                writer_open: true,
            }),
            has_space: Condvar::new(),
            has_data: Condvar::new(),
        })
    }
}

/// The read end of a pipe.
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// The write end of a pipe.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Creates a fresh pipe record and returns its two ends.
///
/// Mirrors `Pipe()`: on success both ends reference the same underlying
/// record but bind different operation vectors (reader vs writer).
pub fn new_pair() -> (PipeReader, PipeWriter) {
    let shared = PipeShared::new();
    trace!("pipe: created");
    (
        PipeReader {
            shared: shared.clone(),
        },
        PipeWriter { shared },
    )
}

impl PipeReader {
    /// `read(buf, n) -> bytes_read | error`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.shared.state.lock().unwrap();
        if !guard.reader_open {
            return_errno_with_message!(Errno::EBADF, "pipe reader end is already closed");
        }

        if !guard.writer_open {
            // Drain semantics: copy what's left and return, possibly zero (EOF).
            let n = drain(&mut guard, buf);
            if n > 0 {
                self.shared.has_space.notify_all();
            }
            return Ok(n);
        }

        while guard.is_empty() && guard.writer_open {
            guard = self.shared.has_data.wait(guard).unwrap();
        }

        let n = drain(&mut guard, buf);
        if n > 0 {
            self.shared.has_space.notify_all();
        }
        Ok(n)
    }

    /// `reader_close`: marks the reader end closed.
    pub fn close(&self) {
        let mut guard = self.shared.state.lock().unwrap();
        if !guard.reader_open {
            return;
        }
        guard.reader_open = false;
        let writer_open = guard.writer_open;
        drop(guard);
        if writer_open {
            // Wake any writer blocked on a full buffer so it observes the closed reader.
            self.shared.has_space.notify_all();
        }
        trace!("pipe: reader closed");
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl PipeWriter {
    /// `write(buf, n) -> bytes_written | error`.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = buf.len();
        let mut guard = self.shared.state.lock().unwrap();
        if !guard.reader_open {
            return_errno_with_message!(Errno::EPIPE, "pipe reader end is closed");
        }

        while guard.is_full() && guard.reader_open {
            guard = self.shared.has_space.wait(guard).unwrap();
        }

        if !guard.reader_open {
            // Reader closed while we waited: nothing was copied, nothing to overwrite.
            return Ok(0);
        }

        let mut written = 0;
        while written < n && !guard.is_full() {
            let w = guard.w;
            guard.buf[w] = buf[written];
            guard.w = (w + 1) % PIPE_BUFFER_SIZE;
            written += 1;
        }

        if written > 0 {
            self.shared.has_data.notify_all();
        }
        Ok(written)
    }

    /// `writer_close`: marks the writer end closed.
    pub fn close(&self) {
        let mut guard = self.shared.state.lock().unwrap();
        if !guard.writer_open {
            return;
        }
        guard.writer_open = false;
        let reader_open = guard.reader_open;
        drop(guard);
        if reader_open {
            // Wake any reader blocked on an empty buffer so it observes EOF.
            self.shared.has_data.notify_all();
        }
        trace!("pipe: writer closed");
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copies up to `buf.len()` available bytes out of the ring, advancing `r`.
fn drain(state: &mut PipeState, buf: &mut [u8]) -> usize {
    let mut n = 0;
    while n < buf.len() && !state.is_empty() {
        let r = state.r;
        buf[n] = state.buf[r];
        state.r = (r + 1) % PIPE_BUFFER_SIZE;
        n += 1;
    }
    n
}
