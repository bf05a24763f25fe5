// SPDX-License-Identifier: MPL-2.0

//! Per-process thread descriptors (PTCBs): creation, join, detach, exit —
//! including the last-thread-exit process teardown.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread as os_thread;

use lazy_static::lazy_static;

use crate::prelude::*;
use crate::process::{Process, INIT_PID};

pub type Tid = u64;

static TID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

fn allocate_tid() -> Tid {
    TID_ALLOCATOR.fetch_add(1, Ordering::SeqCst)
}

struct PtcbState {
    exited: bool,
    detached: bool,
    refcount: usize,
    exit_value: i32,
}

/// A per-thread user-visible descriptor carrying joinability state,
/// distinct from the underlying OS thread it is (initially) backed by.
pub struct Ptcb {
    tid: Tid,
    state: Mutex<PtcbState>,
    exit_cv: Condvar,
}

impl Ptcb {
    fn new(tid: Tid) -> Arc<Self> {
        Arc::new(Self {
            tid,
            state: Mutex::new(PtcbState {
                exited: false,
                detached: false,
                refcount: 0,
                exit_value: 0,
            }),
            exit_cv: Condvar::new(),
        })
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }
}

lazy_static! {
    /// Process-wide table of thread descriptors, mirroring the reference
    /// kernel's `thread_table.rs` (`BTreeMap` behind a `Mutex`).
    static ref THREAD_TABLE: Mutex<BTreeMap<Tid, Arc<Ptcb>>> = Mutex::new(BTreeMap::new());
}

thread_local! {
    static CURRENT: RefCell<Option<(Arc<Process>, Arc<Ptcb>)>> = RefCell::new(None);
}

pub(crate) fn set_current(process: Arc<Process>, ptcb: Arc<Ptcb>) {
    CURRENT.with(|c| *c.borrow_mut() = Some((process, ptcb)));
}

/// The process owning the calling OS thread, as set by
/// [`Process::create_thread`]'s trampoline or by
/// [`crate::kernel::Kernel::spawn_process`].
///
/// # Panics
/// Panics if called from an OS thread never registered with this crate —
/// mirroring the kernel's implicit "current process" assumption.
pub fn current_process() -> Arc<Process> {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .expect("no current process bound to this OS thread")
            .0
            .clone()
    })
}

pub fn current_ptcb() -> Arc<Ptcb> {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .expect("no current thread bound to this OS thread")
            .1
            .clone()
    })
}

/// `ThreadSelf()`.
pub fn thread_self() -> Tid {
    current_ptcb().tid()
}

impl Process {
    /// `CreateThread(task, argl, args)`. The `(argl, args)` byte blob of the
    /// original interface becomes a single boxed closure — the idiomatic
    /// replacement for a function pointer plus an untyped argument pair. A
    /// null task is therefore unrepresentable: the type system removes
    /// that error case instead of checking for it at run time.
    pub fn create_thread(
        self: &Arc<Self>,
        task: impl FnOnce() -> i32 + Send + 'static,
    ) -> Result<Tid> {
        let ptcb = Ptcb::new(allocate_tid());
        self.threads.lock().unwrap().push(ptcb.clone());
        self.thread_count.fetch_add(1, Ordering::SeqCst);
        THREAD_TABLE.lock().unwrap().insert(ptcb.tid(), ptcb.clone());

        let process = self.clone();
        let trampoline_ptcb = ptcb.clone();
        os_thread::spawn(move || {
            set_current(process.clone(), trampoline_ptcb.clone());
            let exit_value = task();
            do_exit(&process, &trampoline_ptcb, exit_value);
        });

        trace!("thread: created tid {}", ptcb.tid());
        Ok(ptcb.tid())
    }

    /// `ThreadJoin(tid, *exitval)`.
    pub fn thread_join(self: &Arc<Self>, tid: Tid) -> Result<i32> {
        if tid == current_ptcb().tid() {
            return_errno_with_message!(Errno::EINVAL, "a thread cannot join itself");
        }
        let ptcb = self.find_member(tid)?;

        let mut state = ptcb.state.lock().unwrap();
        if state.detached {
            return_errno_with_message!(Errno::EINVAL, "thread is detached");
        }
        state.refcount += 1;

        loop {
            if state.exited {
                break;
            }
            state = ptcb.exit_cv.wait(state).unwrap();
            if state.detached && !state.exited {
                state.refcount -= 1;
                return_errno_with_message!(Errno::EINVAL, "thread was detached while joining");
            }
        }

        let exit_value = state.exit_value;
        state.refcount -= 1;
        let refcount = state.refcount;
        drop(state);
        if refcount == 0 {
            self.reap(tid);
        }
        Ok(exit_value)
    }

    /// `ThreadDetach(tid)`.
    pub fn thread_detach(&self, tid: Tid) -> Result<()> {
        let ptcb = self.find_member(tid)?;
        let mut state = ptcb.state.lock().unwrap();
        if state.exited {
            return_errno_with_message!(Errno::EINVAL, "thread already exited");
        }
        state.detached = true;
        drop(state);
        ptcb.exit_cv.notify_all();
        Ok(())
    }

    /// Registers the calling OS thread as this process's first ("main")
    /// thread member, without spawning a new OS thread — a process's first
    /// thread is simply whichever thread created it.
    pub fn bootstrap_main_thread(self: &Arc<Self>) -> Tid {
        let ptcb = Ptcb::new(allocate_tid());
        self.threads.lock().unwrap().push(ptcb.clone());
        self.thread_count.fetch_add(1, Ordering::SeqCst);
        THREAD_TABLE.lock().unwrap().insert(ptcb.tid(), ptcb.clone());
        set_current(self.clone(), ptcb.clone());
        ptcb.tid()
    }

    fn find_member(&self, tid: Tid) -> Result<Arc<Ptcb>> {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .find(|ptcb| ptcb.tid() == tid)
            .cloned()
            .ok_or(Error::with_message(
                Errno::ESRCH,
                "no such thread in this process",
            ))
    }

    /// Removes `tid` from this process's descriptor list and the global
    /// thread table, but only if it is both exited and unheld by any
    /// joiner — the "freed exactly once, by the last party to release a
    /// reference" invariant.
    fn reap(&self, tid: Tid) {
        let mut threads = self.threads.lock().unwrap();
        if let Some(idx) = threads.iter().position(|ptcb| ptcb.tid() == tid) {
            let should_remove = {
                let state = threads[idx].state.lock().unwrap();
                state.exited && state.refcount == 0
            };
            if should_remove {
                threads.remove(idx);
                THREAD_TABLE.lock().unwrap().remove(&tid);
            }
        }
    }
}

/// `ThreadExit(exitval)`, called explicitly by a thread that wants to exit
/// before its task closure returns. Performs the same bookkeeping the
/// trampoline performs implicitly when a task closure simply returns, then
/// — matching "sleep in state EXITED, never returning" literally — parks
/// the underlying OS thread forever.
pub fn thread_exit(exit_value: i32) -> ! {
    let process = current_process();
    let ptcb = current_ptcb();
    do_exit(&process, &ptcb, exit_value);
    loop {
        os_thread::park();
    }
}

fn do_exit(process: &Arc<Process>, ptcb: &Arc<Ptcb>, exit_value: i32) {
    {
        let mut state = ptcb.state.lock().unwrap();
        state.exited = true;
        state.exit_value = exit_value;
        ptcb.exit_cv.notify_all();
    }
    process.reap(ptcb.tid());

    let remaining = process.thread_count.fetch_sub(1, Ordering::SeqCst) - 1;
    trace!(
        "thread: tid {} exited, {} threads remain in process {}",
        ptcb.tid(),
        remaining,
        process.pid()
    );
    if remaining == 0 {
        teardown_process(process);
    }
}

/// Last-thread-exit process teardown: reparent children to init, append
/// already-exited children to init's exited list, record this process's
/// own exit with its parent, release file descriptors, and mark Zombie.
fn teardown_process(process: &Arc<Process>) {
    if process.pid() != INIT_PID {
        if let Some(table) = process.process_table() {
            if let Some(init) = table.get(INIT_PID) {
                let children = process.take_children();
                for child in &children {
                    init.adopt_child(child);
                }
                let exited = process.take_exited_children();
                if !exited.is_empty() {
                    init.absorb_exited_children(exited);
                }
            }
        }
        if let Some(parent) = process.parent() {
            parent.record_child_exit(process.pid());
        }
    }
    process.handle_table().lock().unwrap().close_all();
    process.mark_zombie();
    debug!(
        "process {}: last thread exited, process is now a zombie",
        process.pid()
    );
}
