// SPDX-License-Identifier: MPL-2.0

//! The listener-side request queue and per-request admission rendezvous.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use super::Socket;
use crate::prelude::*;

/// Payload attached to a socket in the `Listener` role.
pub struct ListenerState {
    pub(super) queue: Mutex<VecDeque<Arc<ConnRequest>>>,
    pub(super) req_arrived: Condvar,
}

impl ListenerState {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            req_arrived: Condvar::new(),
        }
    }
}

pub(super) struct ConnRequestState {
    pub(super) admitted: bool,
}

/// A pending connection request sitting on a listener's queue.
pub struct ConnRequest {
    pub(super) requester: Arc<Socket>,
    pub(super) state: Mutex<ConnRequestState>,
    pub(super) admit_cv: Condvar,
}

impl ConnRequest {
    pub(super) fn new(requester: Arc<Socket>) -> Self {
        Self {
            requester,
            state: Mutex::new(ConnRequestState { admitted: false }),
            admit_cv: Condvar::new(),
        }
    }
}
