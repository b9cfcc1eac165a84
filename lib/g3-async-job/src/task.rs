/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use atomic_waker::AtomicWaker;
use thiserror::Error;

use crate::{AsyncJob, AsyncJobError, AsyncWaitCtx, AsyncWaitStatus, StartJobStatus};

/// A blocking operation that may call [`pause_job`](crate::pause_job)
pub trait SyncOperation {
    type Output;

    fn run(&mut self) -> anyhow::Result<Self::Output>;
}

/// Waits on the fds a paused job registered in its wait context
pub trait AsyncOperation {
    fn track_raw_fd(&mut self, fd: RawFd) -> io::Result<()>;
    fn untrack_raw_fd(&mut self, fd: RawFd);
    fn poll_ready_fds(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

#[derive(Debug, Error)]
pub enum AsyncJobTaskError {
    #[error("async job error: {0}")]
    Job(#[from] AsyncJobError),
    #[error("runtime error: {0:?}")]
    Runtime(#[from] io::Error),
    #[error("operation error: {0:?}")]
    Operation(anyhow::Error),
    #[error("engine reported error while the job was paused")]
    Engine,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

struct Action<T: SyncOperation> {
    operation: Option<T>,
    result: Option<anyhow::Result<T::Output>>,
}

/// Drive a [`SyncOperation`] as an async job
pub struct AsyncJobTask<T: SyncOperation, A> {
    job: Option<AsyncJob>,
    wait_ctx: AsyncWaitCtx,
    atomic_waker: Arc<AtomicWaker>,
    action: Rc<RefCell<Action<T>>>,
    async_op: A,
}

/// NOTE: AsyncJobTask in fact is not Send,
/// make sure you call it in a single threaded async runtime
unsafe impl<T: SyncOperation + Send, A: AsyncOperation + Send> Send for AsyncJobTask<T, A> {}

impl<T, A> AsyncJobTask<T, A>
where
    T: SyncOperation + 'static,
    A: AsyncOperation,
{
    pub fn new(operation: T, async_op: A) -> Self {
        let atomic_waker = Arc::new(AtomicWaker::new());
        let wait_ctx = AsyncWaitCtx::new();
        let waker = atomic_waker.clone();
        wait_ctx.set_callback(Arc::new(move || waker.wake()));
        AsyncJobTask {
            job: None,
            wait_ctx,
            atomic_waker,
            action: Rc::new(RefCell::new(Action {
                operation: Some(operation),
                result: None,
            })),
            async_op,
        }
    }

    fn poll_run(&mut self, cx: &mut Context<'_>) -> Poll<Result<T::Output, AsyncJobTaskError>> {
        self.atomic_waker.register(cx.waker());

        loop {
            let r = crate::start_job(
                &mut self.job,
                Some(&self.wait_ctx),
                run_action(self.action.clone()),
            )?;

            match r {
                StartJobStatus::NoJobs => {
                    // no available jobs, yield now and wake later
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                StartJobStatus::Pause => match self.wait_ctx.status() {
                    AsyncWaitStatus::Unsupported => {
                        let (add, del) = self.wait_ctx.get_changed_fds();
                        for fd in del {
                            self.async_op.untrack_raw_fd(fd);
                        }
                        for fd in add {
                            self.async_op.track_raw_fd(fd)?;
                        }
                        if self.wait_ctx.fd_count() == 0 {
                            // paused without anything to wait on
                            cx.waker().wake_by_ref();
                            return Poll::Pending;
                        }
                        ready!(self.async_op.poll_ready_fds(cx))?;
                    }
                    AsyncWaitStatus::Err => return Poll::Ready(Err(AsyncJobTaskError::Engine)),
                    AsyncWaitStatus::Ok => {
                        // submitted, wait for the callback
                        return Poll::Pending;
                    }
                    AsyncWaitStatus::EAgain => {
                        // engine busy, resume later
                        cx.waker().wake_by_ref();
                        return Poll::Pending;
                    }
                },
                StartJobStatus::Finish(_) => {
                    let r = self.action.borrow_mut().result.take();
                    return match r {
                        Some(r) => Poll::Ready(r.map_err(AsyncJobTaskError::Operation)),
                        None => Poll::Ready(Err(AsyncJobTaskError::Unexpected(
                            "no result set by the async job".to_string(),
                        ))),
                    };
                }
            }
        }
    }
}

fn run_action<T>(action: Rc<RefCell<Action<T>>>) -> impl FnOnce() -> i32 + 'static
where
    T: SyncOperation + 'static,
{
    move || {
        // the operation is kept in place if the pool had no job for us
        let operation = action.borrow_mut().operation.take();
        let Some(mut operation) = operation else {
            return -1;
        };
        let r = operation.run();
        action.borrow_mut().result = Some(r);
        0
    }
}

impl<T, A> Future for AsyncJobTask<T, A>
where
    T: SyncOperation + 'static,
    A: AsyncOperation + Unpin,
{
    type Output = Result<T::Output, AsyncJobTaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_run(cx)
    }
}

#[cfg(all(test, feature = "fibre"))]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::anyhow;

    use crate::{current_job, pause_job};

    #[derive(Default)]
    struct NoFds {
        tracked: Vec<RawFd>,
    }

    impl AsyncOperation for NoFds {
        fn track_raw_fd(&mut self, fd: RawFd) -> io::Result<()> {
            self.tracked.push(fd);
            Ok(())
        }

        fn untrack_raw_fd(&mut self, fd: RawFd) {
            self.tracked.retain(|v| *v != fd);
        }

        fn poll_ready_fds(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Yielding {
        rounds: usize,
    }

    impl SyncOperation for Yielding {
        type Output = usize;

        fn run(&mut self) -> anyhow::Result<usize> {
            let mut n = 0;
            for _ in 0..self.rounds {
                pause_job()?;
                n += 1;
            }
            Ok(n)
        }
    }

    #[tokio::test]
    async fn yield_without_fds() {
        let task = AsyncJobTask::new(Yielding { rounds: 3 }, NoFds::default());
        let n = task.await.unwrap();
        assert_eq!(n, 3);
    }

    struct Failing;

    impl SyncOperation for Failing {
        type Output = ();

        fn run(&mut self) -> anyhow::Result<()> {
            Err(anyhow!("bad key"))
        }
    }

    #[tokio::test]
    async fn operation_error() {
        let task = AsyncJobTask::new(Failing, NoFds::default());
        match task.await {
            Err(AsyncJobTaskError::Operation(e)) => assert_eq!(e.to_string(), "bad key"),
            r => panic!("unexpected result {r:?}"),
        }
    }

    struct CallbackEngine {
        delay: Duration,
    }

    impl SyncOperation for CallbackEngine {
        type Output = &'static str;

        fn run(&mut self) -> anyhow::Result<&'static str> {
            let job = current_job().ok_or_else(|| anyhow!("not in async job"))?;
            let ctx = job.wait_ctx().ok_or_else(|| anyhow!("no wait ctx"))?;
            let callback = ctx.callback().ok_or_else(|| anyhow!("no callback set"))?;

            ctx.set_status(AsyncWaitStatus::Ok);
            let delay = self.delay;
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                callback();
            });
            pause_job()?;
            ctx.set_status(AsyncWaitStatus::Unsupported);
            Ok("signed")
        }
    }

    #[tokio::test]
    async fn callback_wakeup() {
        let task = AsyncJobTask::new(
            CallbackEngine {
                delay: Duration::from_millis(20),
            },
            NoFds::default(),
        );
        let r = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r, "signed");
    }

    struct EngineError;

    impl SyncOperation for EngineError {
        type Output = ();

        fn run(&mut self) -> anyhow::Result<()> {
            if let Some(ctx) = current_job().and_then(|job| job.wait_ctx()) {
                ctx.set_status(AsyncWaitStatus::Err);
            }
            pause_job()?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn engine_error() {
        let task = AsyncJobTask::new(EngineError, NoFds::default());
        assert!(matches!(task.await, Err(AsyncJobTaskError::Engine)));
    }

    #[tokio::test]
    async fn no_jobs_retry() {
        crate::async_thread_init(1, 1).unwrap();

        let mut holder = None;
        let r = crate::start_job(&mut holder, None, || {
            let _ = pause_job();
            0
        })
        .unwrap();
        assert_eq!(r, StartJobStatus::Pause);

        let mut task = AsyncJobTask::new(Yielding { rounds: 1 }, NoFds::default());
        // the only job is taken
        let r = poll_once(&mut task).await;
        assert!(r.is_none());

        let r = crate::start_job(&mut holder, None, || 0).unwrap();
        assert_eq!(r, StartJobStatus::Finish(0));
        assert_eq!(task.await.unwrap(), 1);

        crate::async_thread_cleanup();
    }

    async fn poll_once<F: Future + Unpin>(f: &mut F) -> Option<F::Output> {
        std::future::poll_fn(|cx| match Pin::new(&mut *f).poll(cx) {
            Poll::Ready(v) => Poll::Ready(Some(v)),
            Poll::Pending => Poll::Ready(None),
        })
        .await
    }
}
