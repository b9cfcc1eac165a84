/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Arc;

/// Opaque key of a wait fd entry
///
/// Engines usually use the address of some private static value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey(usize);

impl WaitKey {
    pub const fn new(v: usize) -> Self {
        WaitKey(v)
    }

    pub fn from_ref<T: ?Sized>(v: &T) -> Self {
        WaitKey(v as *const T as *const () as usize)
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl From<usize> for WaitKey {
    fn from(v: usize) -> Self {
        WaitKey(v)
    }
}

pub type WaitCustomData = Rc<dyn Any>;

/// Called exactly once when the entry is cleared, replaced, or the context is dropped
pub type WaitFdCleanup = Box<dyn FnOnce(WaitKey, RawFd, Option<WaitCustomData>)>;

/// Wake up callback, may be called from any thread
pub type WaitCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum AsyncWaitStatus {
    /// No callback notification, wait on the fds
    #[default]
    Unsupported = 0,
    Err = 1,
    /// Submitted, the callback will be called when ready
    Ok = 2,
    /// Engine busy, retry later
    EAgain = 3,
}

struct FdEntry {
    key: WaitKey,
    fd: RawFd,
    custom_data: Option<WaitCustomData>,
    cleanup: Option<WaitFdCleanup>,
    added: bool,
}

impl FdEntry {
    fn cleanup(self) {
        if let Some(cleanup) = self.cleanup {
            cleanup(self.key, self.fd, self.custom_data);
        }
    }
}

#[derive(Default)]
struct WaitCtxInner {
    fds: RefCell<Vec<FdEntry>>,
    removed: RefCell<Vec<RawFd>>,
    callback: RefCell<Option<WaitCallback>>,
    status: Cell<AsyncWaitStatus>,
}

impl Drop for WaitCtxInner {
    fn drop(&mut self) {
        for entry in self.fds.get_mut().drain(..) {
            entry.cleanup();
        }
    }
}

/// Registry of the fds a paused job is waiting on
///
/// The handle is reference counted: the caller keeps one, the job it is
/// attached to holds another until it finishes. It is not `Send`.
#[derive(Clone, Default)]
pub struct AsyncWaitCtx {
    inner: Rc<WaitCtxInner>,
}

impl fmt::Debug for AsyncWaitCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWaitCtx")
            .field("fds", &self.get_all_fds())
            .field("status", &self.status())
            .finish()
    }
}

impl AsyncWaitCtx {
    pub fn new() -> Self {
        AsyncWaitCtx::default()
    }

    /// Check if the two handles refer to the same context
    pub fn same_as(&self, other: &AsyncWaitCtx) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `fd` under `key`, replacing any existing entry for that key
    ///
    /// Returns false and does nothing if `fd` is not a valid fd.
    pub fn set_wait_fd(
        &self,
        key: WaitKey,
        fd: RawFd,
        custom_data: Option<WaitCustomData>,
        cleanup: Option<WaitFdCleanup>,
    ) -> bool {
        if fd < 0 {
            return false;
        }
        self.clear_fd(key);
        self.inner.fds.borrow_mut().push(FdEntry {
            key,
            fd,
            custom_data,
            cleanup,
            added: true,
        });
        true
    }

    pub fn get_fd(&self, key: WaitKey) -> Option<(RawFd, Option<WaitCustomData>)> {
        self.inner
            .fds
            .borrow()
            .iter()
            .find(|e| e.key == key)
            .map(|e| (e.fd, e.custom_data.clone()))
    }

    pub fn fd_count(&self) -> usize {
        self.inner.fds.borrow().len()
    }

    /// Fill `buf` with the registered fds, returns how many were written
    ///
    /// Use [`fd_count`](Self::fd_count) to size the buffer.
    pub fn get_all_fds_into(&self, buf: &mut [RawFd]) -> usize {
        let fds = self.inner.fds.borrow();
        let mut n = 0;
        for (dst, entry) in buf.iter_mut().zip(fds.iter()) {
            *dst = entry.fd;
            n += 1;
        }
        n
    }

    pub fn get_all_fds(&self) -> Vec<RawFd> {
        let mut fds = vec![0; self.fd_count()];
        let n = self.get_all_fds_into(&mut fds);
        fds.truncate(n);
        fds
    }

    /// Get the number of added and removed fds since the last check
    pub fn changed_fd_count(&self) -> (usize, usize) {
        let added = self.inner.fds.borrow().iter().filter(|e| e.added).count();
        (added, self.inner.removed.borrow().len())
    }

    /// Get the added and removed fds since the last call to this method
    pub fn get_changed_fds(&self) -> (Vec<RawFd>, Vec<RawFd>) {
        let mut add_fds = Vec::new();
        for entry in self.inner.fds.borrow_mut().iter_mut() {
            if entry.added {
                entry.added = false;
                add_fds.push(entry.fd);
            }
        }
        let del_fds = std::mem::take(&mut *self.inner.removed.borrow_mut());
        (add_fds, del_fds)
    }

    /// Remove the entry of `key` and run its cleanup, returns false if not found
    pub fn clear_fd(&self, key: WaitKey) -> bool {
        let entry = {
            let mut fds = self.inner.fds.borrow_mut();
            match fds.iter().position(|e| e.key == key) {
                Some(i) => fds.remove(i),
                None => return false,
            }
        };
        // an fd that was never reported as added is not reported as removed
        if !entry.added {
            self.inner.removed.borrow_mut().push(entry.fd);
        }
        entry.cleanup();
        true
    }

    pub fn set_callback(&self, callback: WaitCallback) {
        *self.inner.callback.borrow_mut() = Some(callback);
    }

    pub fn clear_callback(&self) {
        self.inner.callback.borrow_mut().take();
    }

    pub fn callback(&self) -> Option<WaitCallback> {
        self.inner.callback.borrow().clone()
    }

    pub fn set_status(&self, status: AsyncWaitStatus) {
        self.inner.status.set(status);
    }

    pub fn status(&self) -> AsyncWaitStatus {
        self.inner.status.get()
    }
}
