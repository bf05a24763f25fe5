// SPDX-License-Identifier: MPL-2.0

//! A minimal process record — the out-of-scope "process control block and
//! its parent/child topology" collaborator named in the design, stubbed
//! just deeply enough to make thread-lifecycle teardown (reparenting to
//! init, zombie transition) observable and testable on its own.
//!
//! There is no fork/exec/signal handling here; processes are created only
//! via [`ProcessTable::spawn`], a stand-in for whatever real process
//! creation path a full kernel would have.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::handle::HandleTable;
use crate::prelude::*;
use crate::thread::Ptcb;

pub type Pid = u64;

/// pid of the process that orphaned children are reparented to.
pub const INIT_PID: Pid = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Zombie,
}

pub struct Process {
    pid: Pid,
    parent: Mutex<Weak<Process>>,
    children: Mutex<BTreeMap<Pid, Arc<Process>>>,
    exited_children: Mutex<Vec<Pid>>,
    child_exit: Condvar,
    process_table: Weak<ProcessTable>,
    pub(crate) threads: Mutex<Vec<Arc<Ptcb>>>,
    pub(crate) thread_count: AtomicUsize,
    handles: Mutex<HandleTable>,
    state: Mutex<ProcessState>,
}

impl Process {
    fn new(
        pid: Pid,
        parent: Option<&Arc<Process>>,
        table: &Arc<ProcessTable>,
        max_handles: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid,
            parent: Mutex::new(parent.map(Arc::downgrade).unwrap_or_default()),
            children: Mutex::new(BTreeMap::new()),
            exited_children: Mutex::new(Vec::new()),
            child_exit: Condvar::new(),
            process_table: Arc::downgrade(table),
            threads: Mutex::new(Vec::new()),
            thread_count: AtomicUsize::new(0),
            handles: Mutex::new(HandleTable::new(max_handles)),
            state: Mutex::new(ProcessState::Running),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap()
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().unwrap().upgrade()
    }

    pub fn children(&self) -> Vec<Pid> {
        self.children.lock().unwrap().keys().cloned().collect()
    }

    pub fn exited_children(&self) -> Vec<Pid> {
        self.exited_children.lock().unwrap().clone()
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::SeqCst)
    }

    pub(crate) fn process_table(&self) -> Option<Arc<ProcessTable>> {
        self.process_table.upgrade()
    }

    pub(crate) fn handle_table(&self) -> &Mutex<HandleTable> {
        &self.handles
    }

    /// Registers `child` as a child of `self`, reparenting it away from
    /// whatever process (if any) held it before.
    pub fn adopt_child(self: &Arc<Self>, child: &Arc<Process>) {
        *child.parent.lock().unwrap() = Arc::downgrade(self);
        self.children
            .lock()
            .unwrap()
            .insert(child.pid, child.clone());
    }

    /// Drains this process's child map, handing ownership to the caller
    /// (used by last-thread teardown to reparent every child to init).
    pub(crate) fn take_children(&self) -> Vec<Arc<Process>> {
        self.children
            .lock()
            .unwrap()
            .drain()
            .map(|(_, child)| child)
            .collect()
    }

    pub(crate) fn take_exited_children(&self) -> Vec<Pid> {
        std::mem::take(&mut *self.exited_children.lock().unwrap())
    }

    /// Appends `pids` to this process's exited-children list (the "wait
    /// result" a real `Wait` syscall would eventually collect) and wakes
    /// anyone blocked waiting for a child to exit.
    pub(crate) fn absorb_exited_children(&self, pids: Vec<Pid>) {
        self.exited_children.lock().unwrap().extend(pids);
        self.child_exit.notify_all();
    }

    pub(crate) fn record_child_exit(&self, pid: Pid) {
        self.exited_children.lock().unwrap().push(pid);
        self.child_exit.notify_all();
    }

    pub(crate) fn mark_zombie(&self) {
        *self.state.lock().unwrap() = ProcessState::Zombie;
    }
}

/// The global pid->process registry, mirroring the reference kernel's
/// `process_table.rs` (a `BTreeMap` behind a single `Mutex`).
pub struct ProcessTable {
    processes: Mutex<BTreeMap<Pid, Arc<Process>>>,
    next_pid: AtomicUsize,
}

impl ProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(BTreeMap::new()),
            next_pid: AtomicUsize::new(INIT_PID as usize),
        })
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().unwrap().get(&pid).cloned()
    }

    /// Creates a new process, optionally parented to an existing one. The
    /// first process a given table creates becomes the init process (pid
    /// 1); last-thread teardown reparents orphans there.
    pub fn spawn(
        self: &Arc<Self>,
        parent: Option<&Arc<Process>>,
        max_handles: usize,
    ) -> Arc<Process> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) as Pid;
        let process = Process::new(pid, parent, self, max_handles);
        if let Some(parent) = parent {
            parent.adopt_child(&process);
        }
        self.processes.lock().unwrap().insert(pid, process.clone());
        process
    }
}
