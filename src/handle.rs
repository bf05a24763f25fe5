// SPDX-License-Identifier: MPL-2.0

//! A minimal per-process handle table: the FCB-reservation-service stand-in
//! named as an out-of-scope external collaborator in the design. Its only
//! job is to hand out integer handles and keep the record they name alive.

use crate::pipe::{PipeReader, PipeWriter};
use crate::prelude::*;
use crate::socket::Socket;

pub type Handle = i32;

/// Sentinel meaning "no live handle".
pub const NOFILE: Handle = -1;

/// What a handle can refer to.
pub enum FileEndpoint {
    PipeReader(Arc<PipeReader>),
    PipeWriter(Arc<PipeWriter>),
    Socket(Arc<Socket>),
}

impl Clone for FileEndpoint {
    fn clone(&self) -> Self {
        match self {
            FileEndpoint::PipeReader(r) => FileEndpoint::PipeReader(r.clone()),
            FileEndpoint::PipeWriter(w) => FileEndpoint::PipeWriter(w.clone()),
            FileEndpoint::Socket(s) => FileEndpoint::Socket(s.clone()),
        }
    }
}

pub struct HandleTable {
    slots: Vec<Option<FileEndpoint>>,
    max_handles: usize,
}

impl HandleTable {
    pub fn new(max_handles: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_handles,
        }
    }

    fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    /// Reserves and fills one slot, growing the table if there is room.
    pub fn insert(&mut self, endpoint: FileEndpoint) -> Result<Handle> {
        if let Some(idx) = self.first_free() {
            self.slots[idx] = Some(endpoint);
            return Ok(idx as Handle);
        }
        if self.slots.len() >= self.max_handles {
            return_errno_with_message!(Errno::ENFILE, "handle table is full");
        }
        self.slots.push(Some(endpoint));
        Ok((self.slots.len() - 1) as Handle)
    }

    /// Reserves `n` handles atomically: either all `n` slots are acquired
    /// and filled with `endpoints`, or none are (no partial allocation).
    pub fn insert_many(&mut self, endpoints: Vec<FileEndpoint>) -> Result<Vec<Handle>> {
        let free_now = self.slots.iter().filter(|s| s.is_none()).count();
        let needed = endpoints.len().saturating_sub(free_now);
        if self.slots.len() + needed > self.max_handles {
            return_errno_with_message!(Errno::EMFILE, "not enough free handles for this request");
        }
        let mut handles = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            handles.push(self.insert(endpoint).expect("capacity checked above"));
        }
        Ok(handles)
    }

    pub fn get(&self, handle: Handle) -> Result<FileEndpoint> {
        if handle < 0 {
            return_errno_with_message!(Errno::EBADF, "negative handle");
        }
        self.slots
            .get(handle as usize)
            .and_then(|slot| slot.clone())
            .ok_or(Error::with_message(Errno::EBADF, "no such handle"))
    }

    pub fn remove(&mut self, handle: Handle) -> Result<FileEndpoint> {
        if handle < 0 {
            return_errno_with_message!(Errno::EBADF, "negative handle");
        }
        match self.slots.get_mut(handle as usize) {
            Some(slot @ Some(_)) => Ok(slot.take().unwrap()),
            _ => return_errno_with_message!(Errno::EBADF, "no such handle"),
        }
    }

    /// Releases every live handle, returning them for the caller to close.
    pub fn close_all(&mut self) -> Vec<FileEndpoint> {
        self.slots.drain(..).flatten().collect()
    }
}

impl FileEndpoint {
    pub fn close(&self) {
        match self {
            FileEndpoint::PipeReader(r) => r.close(),
            FileEndpoint::PipeWriter(w) => w.close(),
            FileEndpoint::Socket(s) => {
                let _ = s.close();
            }
        }
    }
}
