/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::fibre::Fibre;
use crate::{AsyncJobError, AsyncJobPoolConfig};

static POOL_GENERATION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static JOB_POOL: RefCell<Option<JobPool>> = const { RefCell::new(None) };
}

/// A fibre lent out by the thread pool
pub(crate) struct PoolSlot {
    pub(crate) fibre: Fibre,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncJobPoolStats {
    /// 0 if the pool is unbounded
    pub max_size: usize,
    /// fibres created by this pool and not yet discarded
    pub curr_size: usize,
    /// fibres ready for a new job
    pub idle: usize,
}

impl AsyncJobPoolStats {
    #[inline]
    pub fn in_use(&self) -> usize {
        self.curr_size - self.idle
    }
}

struct JobPool {
    generation: u64,
    config: AsyncJobPoolConfig,
    curr_size: usize,
    free: Vec<Fibre>,
}

impl JobPool {
    fn new(config: &AsyncJobPoolConfig) -> Result<Self, AsyncJobError> {
        if !config.is_size_valid() {
            return Err(AsyncJobError::InvalidPoolSize {
                max_size: config.max_size(),
                init_size: config.init_size(),
            });
        }

        let mut free = Vec::with_capacity(config.init_size());
        for _ in 0..config.init_size() {
            // the already created fibres are dropped on error
            free.push(Fibre::new(config.stack_size())?);
        }

        Ok(JobPool {
            generation: POOL_GENERATION.fetch_add(1, Ordering::Relaxed),
            config: config.clone(),
            curr_size: free.len(),
            free,
        })
    }

    fn has_room(&self) -> bool {
        self.config.max_size() == 0 || self.curr_size < self.config.max_size()
    }

    fn stats(&self) -> AsyncJobPoolStats {
        AsyncJobPoolStats {
            max_size: self.config.max_size(),
            curr_size: self.curr_size,
            idle: self.free.len(),
        }
    }
}

pub(crate) fn init_thread(config: &AsyncJobPoolConfig) -> Result<(), AsyncJobError> {
    if !crate::fibre::CAPABLE {
        return Err(AsyncJobError::NotCapable);
    }

    JOB_POOL.with(|cell| {
        let mut pool = cell.borrow_mut();
        if pool.is_some() {
            return Err(AsyncJobError::PoolAlreadyInitialized);
        }
        *pool = Some(JobPool::new(config)?);
        debug!(
            "async job pool initialized with max size {} init size {}",
            config.max_size(),
            config.init_size()
        );
        Ok(())
    })
}

pub(crate) fn cleanup_thread() {
    let Ok(Some(pool)) = JOB_POOL.try_with(|cell| cell.borrow_mut().take()) else {
        return;
    };
    let stats = pool.stats();
    if stats.in_use() > 0 {
        warn!(
            "{} async jobs are still in use while cleaning up the job pool",
            stats.in_use()
        );
    }
    debug!("async job pool cleaned up, {} idle fibres freed", stats.idle);
}

pub(crate) fn stats() -> Option<AsyncJobPoolStats> {
    JOB_POOL.with(|cell| cell.borrow().as_ref().map(JobPool::stats))
}

/// Get a fibre for a new job, or `None` if the pool is exhausted
///
/// A pool with the default config is created if this thread has none.
pub(crate) fn acquire() -> Result<Option<PoolSlot>, AsyncJobError> {
    JOB_POOL.with(|cell| {
        let mut guard = cell.borrow_mut();
        if guard.is_none() {
            debug!("no async job pool initialized on this thread, creating a default one");
            *guard = Some(JobPool::new(&AsyncJobPoolConfig::default())?);
        }
        let Some(pool) = guard.as_mut() else {
            return Ok(None);
        };

        if let Some(fibre) = pool.free.pop() {
            return Ok(Some(PoolSlot {
                fibre,
                generation: pool.generation,
            }));
        }
        if !pool.has_room() {
            return Ok(None);
        }

        let fibre = Fibre::new(pool.config.stack_size())?;
        pool.curr_size += 1;
        Ok(Some(PoolSlot {
            fibre,
            generation: pool.generation,
        }))
    })
}

/// Return the fibre of a finished job
///
/// The fibre is dropped if the pool it came from has been cleaned up.
pub(crate) fn release(slot: PoolSlot) {
    let _ = JOB_POOL.try_with(|cell| {
        if let Some(pool) = cell.borrow_mut().as_mut() {
            if pool.generation == slot.generation {
                pool.free.push(slot.fibre);
            }
        }
    });
}

/// Drop a fibre that can not be reused and give its room back to the pool
pub(crate) fn discard(slot: PoolSlot) {
    let _ = JOB_POOL.try_with(|cell| {
        if let Some(pool) = cell.borrow_mut().as_mut() {
            if pool.generation == slot.generation {
                pool.curr_size = pool.curr_size.saturating_sub(1);
            }
        }
    });
}

#[cfg(all(test, feature = "fibre"))]
mod tests {
    use super::*;

    #[test]
    fn init_and_cleanup() {
        assert!(stats().is_none());

        init_thread(&AsyncJobPoolConfig::with_size(4, 2)).unwrap();
        let s = stats().unwrap();
        assert_eq!(s.max_size, 4);
        assert_eq!(s.curr_size, 2);
        assert_eq!(s.idle, 2);

        assert_eq!(
            init_thread(&AsyncJobPoolConfig::with_size(4, 2)),
            Err(AsyncJobError::PoolAlreadyInitialized)
        );

        cleanup_thread();
        assert!(stats().is_none());
        // cleanup twice is fine
        cleanup_thread();
    }

    #[test]
    fn invalid_size() {
        assert_eq!(
            init_thread(&AsyncJobPoolConfig::with_size(1, 2)),
            Err(AsyncJobError::InvalidPoolSize {
                max_size: 1,
                init_size: 2
            })
        );
        assert!(stats().is_none());
    }

    #[test]
    fn acquire_release() {
        init_thread(&AsyncJobPoolConfig::with_size(2, 1)).unwrap();

        let a = acquire().unwrap().unwrap();
        assert_eq!(stats().unwrap().idle, 0);
        let b = acquire().unwrap().unwrap();
        assert_eq!(stats().unwrap().curr_size, 2);
        assert!(acquire().unwrap().is_none());

        release(a);
        assert_eq!(stats().unwrap().idle, 1);
        discard(b);
        let s = stats().unwrap();
        assert_eq!(s.curr_size, 1);
        assert_eq!(s.in_use(), 0);

        cleanup_thread();
    }

    #[test]
    fn lazy_init() {
        let slot = acquire().unwrap().unwrap();
        let s = stats().unwrap();
        assert_eq!(s.max_size, 0);
        assert_eq!(s.curr_size, 1);
        release(slot);
        assert_eq!(stats().unwrap().idle, 1);
        cleanup_thread();
    }

    #[test]
    fn release_after_cleanup() {
        init_thread(&AsyncJobPoolConfig::with_size(1, 1)).unwrap();
        let slot = acquire().unwrap().unwrap();
        cleanup_thread();

        init_thread(&AsyncJobPoolConfig::with_size(1, 0)).unwrap();
        // the slot belongs to the old pool
        release(slot);
        let s = stats().unwrap();
        assert_eq!(s.curr_size, 0);
        assert_eq!(s.idle, 0);
        cleanup_thread();
    }
}
