/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::os::fd::RawFd;
use std::task::{Context, Poll};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::{AsyncJobTask, AsyncOperation, SyncOperation};

pub struct TokioAsyncOperation {
    tracked_fds: Vec<AsyncFd<RawFd>>,
}

impl TokioAsyncOperation {
    /// Create an async job task in tokio single threaded runtime
    ///
    /// It will panic if called in multi-threaded runtime
    pub fn build_async_task<T>(sync_op: T) -> AsyncJobTask<T, TokioAsyncOperation>
    where
        T: SyncOperation + 'static,
    {
        assert_eq!(
            Handle::current().runtime_flavor(),
            RuntimeFlavor::CurrentThread
        );

        let async_op = TokioAsyncOperation {
            tracked_fds: Vec::with_capacity(1),
        };
        AsyncJobTask::new(sync_op, async_op)
    }

    pub fn tracked_fd_count(&self) -> usize {
        self.tracked_fds.len()
    }
}

impl AsyncOperation for TokioAsyncOperation {
    fn track_raw_fd(&mut self, fd: RawFd) -> io::Result<()> {
        let async_fd = AsyncFd::with_interest(fd, Interest::READABLE)?;
        self.tracked_fds.push(async_fd);
        Ok(())
    }

    fn untrack_raw_fd(&mut self, fd: RawFd) {
        self.tracked_fds.retain(|v| fd.ne(v.get_ref()));
    }

    fn poll_ready_fds(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        for fd in &self.tracked_fds {
            match fd.poll_read_ready(cx) {
                Poll::Pending => {}
                Poll::Ready(Ok(mut guard)) => {
                    // the job checks its own condition again after resume
                    guard.clear_ready();
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            }
        }
        Poll::Pending
    }
}

#[cfg(all(test, feature = "fibre"))]
mod tests {
    use super::*;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::time::Duration;

    use anyhow::anyhow;
    use rustix::io::Errno;
    use rustix::pipe::PipeFlags;

    use crate::{WaitKey, current_job, pause_job};

    struct PipeEngine {
        fd: RawFd,
    }

    impl SyncOperation for PipeEngine {
        type Output = u8;

        fn run(&mut self) -> anyhow::Result<u8> {
            let job = current_job().ok_or_else(|| anyhow!("not in async job"))?;
            let ctx = job.wait_ctx().ok_or_else(|| anyhow!("no wait ctx"))?;

            let key = WaitKey::new(1);
            ctx.set_wait_fd(key, self.fd, None, None);
            pause_job()?;
            ctx.clear_fd(key);
            Ok(42)
        }
    }

    #[tokio::test]
    async fn pipe_readiness() {
        let (r, w) = rustix::pipe::pipe().unwrap();

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            rustix::io::write(&w, b"x").unwrap();
            w
        });

        let task = TokioAsyncOperation::build_async_task(PipeEngine { fd: r.as_raw_fd() });
        let v = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v, 42);

        let _w = writer.join().unwrap();
    }

    struct PipeReader {
        r: OwnedFd,
        want: usize,
    }

    impl SyncOperation for PipeReader {
        type Output = usize;

        fn run(&mut self) -> anyhow::Result<usize> {
            let job = current_job().ok_or_else(|| anyhow!("not in async job"))?;
            let ctx = job.wait_ctx().ok_or_else(|| anyhow!("no wait ctx"))?;

            let key = WaitKey::new(2);
            ctx.set_wait_fd(key, self.r.as_raw_fd(), None, None);
            let mut got = 0;
            let mut pauses = 0;
            let mut buf = [0u8; 16];
            while got < self.want {
                match rustix::io::read(&self.r, &mut buf[..]) {
                    Ok(0) => return Err(anyhow!("pipe closed")),
                    Ok(n) => got += n,
                    Err(Errno::AGAIN) => {
                        pauses += 1;
                        pause_job()?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            ctx.clear_fd(key);
            Ok(pauses)
        }
    }

    #[tokio::test]
    async fn readiness_cleared_between_pauses() {
        let (r, w) = rustix::pipe::pipe_with(PipeFlags::NONBLOCK).unwrap();

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            rustix::io::write(&w, b"a").unwrap();
            std::thread::sleep(Duration::from_millis(200));
            rustix::io::write(&w, b"b").unwrap();
            w
        });

        let task = TokioAsyncOperation::build_async_task(PipeReader { r, want: 2 });
        let pauses = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        // one pause per write, plus a few spurious wakeups at most
        assert!(pauses >= 2);
        assert!(pauses < 10, "job resumed {pauses} times");

        let _w = writer.join().unwrap();
    }

    #[tokio::test]
    async fn track_untrack() {
        let (r1, _w1) = rustix::pipe::pipe().unwrap();
        let (r2, _w2) = rustix::pipe::pipe().unwrap();

        let mut op = TokioAsyncOperation {
            tracked_fds: Vec::new(),
        };
        op.track_raw_fd(r1.as_raw_fd()).unwrap();
        op.track_raw_fd(r2.as_raw_fd()).unwrap();
        assert_eq!(op.tracked_fd_count(), 2);

        op.untrack_raw_fd(r1.as_raw_fd());
        assert_eq!(op.tracked_fd_count(), 1);
        op.untrack_raw_fd(r2.as_raw_fd());
        assert_eq!(op.tracked_fd_count(), 0);
    }
}
