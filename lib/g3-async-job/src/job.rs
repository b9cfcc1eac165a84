/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use log::warn;

use crate::fibre::{self, FibreYield};
use crate::pool::{self, PoolSlot};
use crate::{AsyncJobError, AsyncWaitCtx, StartJobStatus};

type JobFn = Box<dyn FnOnce() -> i32>;

static JOB_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_JOB: RefCell<Option<Rc<JobShared>>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncJobState {
    Running,
    Paused,
    Finished,
    Failed,
}

/// Job state reachable from both the dispatcher and the fibre
struct JobShared {
    id: u64,
    thread: ThreadId,
    state: Cell<AsyncJobState>,
    func: Cell<Option<JobFn>>,
    outcome: Cell<Option<Result<i32, String>>>,
    wait_ctx: RefCell<Option<AsyncWaitCtx>>,
    blocked: Cell<usize>,
}

/// Handle of a started job, kept by the caller while the job is paused
pub struct AsyncJob {
    shared: Rc<JobShared>,
    slot: Option<PoolSlot>,
}

impl fmt::Debug for AsyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncJob")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

impl AsyncJob {
    fn new(slot: PoolSlot, wait_ctx: Option<AsyncWaitCtx>, func: JobFn) -> Self {
        let shared = JobShared {
            id: JOB_ID.fetch_add(1, Ordering::Relaxed),
            thread: thread::current().id(),
            state: Cell::new(AsyncJobState::Running),
            func: Cell::new(Some(func)),
            outcome: Cell::new(None),
            wait_ctx: RefCell::new(wait_ctx),
            blocked: Cell::new(0),
        };
        AsyncJob {
            shared: Rc::new(shared),
            slot: Some(slot),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[inline]
    pub fn state(&self) -> AsyncJobState {
        self.shared.state.get()
    }

    pub fn wait_ctx(&self) -> Option<AsyncWaitCtx> {
        self.shared.wait_ctx.borrow().clone()
    }

    pub fn as_job_ref(&self) -> AsyncJobRef {
        AsyncJobRef {
            shared: self.shared.clone(),
        }
    }

    fn switch_in(&mut self) -> Result<FibreYield, AsyncJobError> {
        let slot = self.slot.as_mut().ok_or(AsyncJobError::SwapContext)?;
        self.shared.state.set(AsyncJobState::Running);
        CURRENT_JOB.with(|cell| *cell.borrow_mut() = Some(self.shared.clone()));
        let r = slot.fibre.resume();
        CURRENT_JOB.with(|cell| cell.borrow_mut().take());
        r
    }

    fn finish(mut self) -> Result<StartJobStatus, AsyncJobError> {
        // dropped outside of the borrow, as fd cleanup callbacks may run
        let wait_ctx = self.shared.wait_ctx.take();
        drop(wait_ctx);

        if let Some(slot) = self.slot.take() {
            pool::release(slot);
        }
        match self.shared.outcome.take() {
            Some(Ok(ret)) => {
                self.shared.state.set(AsyncJobState::Finished);
                Ok(StartJobStatus::Finish(ret))
            }
            Some(Err(msg)) => {
                warn!("async job {} panicked: {msg}", self.shared.id);
                self.shared.state.set(AsyncJobState::Failed);
                Err(AsyncJobError::JobPanicked(msg))
            }
            None => {
                self.shared.state.set(AsyncJobState::Failed);
                Err(AsyncJobError::SwapContext)
            }
        }
    }
}

impl Drop for AsyncJob {
    fn drop(&mut self) {
        // finished jobs have already given their fibre back
        let Some(slot) = self.slot.take() else {
            return;
        };
        if self.shared.state.get() == AsyncJobState::Paused {
            warn!(
                "abandoning paused async job {}, values on its stack are leaked",
                self.shared.id
            );
        }
        self.shared.state.set(AsyncJobState::Failed);
        pool::discard(slot);
        let wait_ctx = self.shared.wait_ctx.take();
        drop(wait_ctx);
    }
}

/// A reference to a job, usable from code running inside the job
#[derive(Clone)]
pub struct AsyncJobRef {
    shared: Rc<JobShared>,
}

impl fmt::Debug for AsyncJobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncJobRef")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

impl AsyncJobRef {
    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[inline]
    pub fn state(&self) -> AsyncJobState {
        self.shared.state.get()
    }

    pub fn wait_ctx(&self) -> Option<AsyncWaitCtx> {
        self.shared.wait_ctx.borrow().clone()
    }
}

/// Start a new job, or resume the paused job in `job`
///
/// With an empty `job`, a fibre is taken from the thread pool and `func` runs
/// on it with `wait_ctx` attached. With a paused job in `job`, the job is
/// resumed where it paused, and `wait_ctx` and `func` are ignored.
///
/// On `Pause` the job handle is stored back into `job`. On `Finish` and on
/// error it is cleared, except for `WrongThread` which leaves it untouched.
pub fn start_job<F>(
    job: &mut Option<AsyncJob>,
    wait_ctx: Option<&AsyncWaitCtx>,
    func: F,
) -> Result<StartJobStatus, AsyncJobError>
where
    F: FnOnce() -> i32 + 'static,
{
    if !fibre::CAPABLE {
        return Err(AsyncJobError::NotCapable);
    }
    if in_job() {
        return Err(AsyncJobError::NestedJob);
    }

    let mut running = match job.take() {
        Some(j) => {
            if j.shared.thread != thread::current().id() {
                *job = Some(j);
                return Err(AsyncJobError::WrongThread);
            }
            j
        }
        None => {
            let Some(slot) = pool::acquire()? else {
                return Ok(StartJobStatus::NoJobs);
            };
            AsyncJob::new(slot, wait_ctx.cloned(), Box::new(func))
        }
    };

    match running.switch_in()? {
        FibreYield::Pause => {
            running.shared.state.set(AsyncJobState::Paused);
            *job = Some(running);
            Ok(StartJobStatus::Pause)
        }
        FibreYield::Finish => running.finish(),
    }
}

/// Run the function of the current job, called on the job's fibre
///
/// No reference to the job is held while the function runs, so nothing but
/// the function's own frames is left behind if the job is abandoned.
pub(crate) fn run_current() {
    let func = CURRENT_JOB.with(|cell| cell.borrow().as_ref().and_then(|s| s.func.take()));
    let outcome = match func {
        Some(func) => {
            panic::catch_unwind(AssertUnwindSafe(func)).map_err(|e| panic_message(&*e))
        }
        None => Err("no function set for the job".to_string()),
    };
    CURRENT_JOB.with(|cell| {
        if let Some(shared) = cell.borrow().as_ref() {
            shared.outcome.set(Some(outcome));
        }
    });
}

fn panic_message(e: &(dyn Any + Send)) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Suspend the current job and return control to the caller of `start_job`
///
/// Returns `Ok` once the job is resumed, or at once if pausing is blocked.
pub fn pause_job() -> Result<(), AsyncJobError> {
    let blocked = CURRENT_JOB.with(|cell| cell.borrow().as_ref().map(|s| s.blocked.get()));
    match blocked {
        None => Err(AsyncJobError::NotInJob),
        Some(0) => fibre::suspend(FibreYield::Pause),
        Some(_) => Ok(()),
    }
}

fn in_job() -> bool {
    CURRENT_JOB.with(|cell| cell.borrow().is_some())
}

pub fn current_job() -> Option<AsyncJobRef> {
    CURRENT_JOB.with(|cell| {
        cell.borrow().as_ref().map(|shared| AsyncJobRef {
            shared: shared.clone(),
        })
    })
}

pub fn get_wait_ctx(job: &AsyncJobRef) -> Option<AsyncWaitCtx> {
    job.wait_ctx()
}

/// Make `pause_job` a no-op in the current job until the matching `unblock_pause`
pub fn block_pause() {
    CURRENT_JOB.with(|cell| {
        if let Some(shared) = cell.borrow().as_ref() {
            shared.blocked.set(shared.blocked.get() + 1);
        }
    })
}

pub fn unblock_pause() {
    CURRENT_JOB.with(|cell| {
        if let Some(shared) = cell.borrow().as_ref() {
            match shared.blocked.get() {
                0 => warn!("unmatched unblock_pause in async job {}", shared.id),
                n => shared.blocked.set(n - 1),
            }
        }
    })
}

/// Blocks pausing of the current job while alive
pub struct BlockPauseGuard {
    _not_send: PhantomData<*const ()>,
}

impl BlockPauseGuard {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        block_pause();
        BlockPauseGuard {
            _not_send: PhantomData,
        }
    }
}

impl Drop for BlockPauseGuard {
    fn drop(&mut self) {
        unblock_pause();
    }
}
