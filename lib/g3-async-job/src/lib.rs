/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::AsyncJobError;

mod status;
pub use status::{AsyncStatusCode, StartJobStatus};

mod config;
pub use config::{AsyncJobPoolConfig, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};

mod fibre;

mod pool;
pub use pool::AsyncJobPoolStats;

mod wait_ctx;
pub use wait_ctx::{
    AsyncWaitCtx, AsyncWaitStatus, WaitCallback, WaitCustomData, WaitFdCleanup, WaitKey,
};

mod job;
pub use job::{
    AsyncJob, AsyncJobRef, AsyncJobState, BlockPauseGuard, block_pause, current_job,
    get_wait_ctx, pause_job, start_job, unblock_pause,
};

mod task;
pub use task::{AsyncJobTask, AsyncJobTaskError, AsyncOperation, SyncOperation};

mod tokio_op;
pub use tokio_op::TokioAsyncOperation;

/// Whether jobs can be started in this build
pub fn async_is_capable() -> bool {
    fibre::CAPABLE
}

/// Set up the job pool of the calling thread
///
/// A `max_size` of 0 means the pool is unbounded.
pub fn async_thread_init(max_size: usize, init_size: usize) -> Result<(), AsyncJobError> {
    pool::init_thread(&AsyncJobPoolConfig::with_size(max_size, init_size))
}

pub fn async_thread_init_with_config(config: &AsyncJobPoolConfig) -> Result<(), AsyncJobError> {
    pool::init_thread(config)
}

/// Free all idle jobs of the calling thread
///
/// Jobs still paused are not tracked by the pool any more and their fibres
/// will be freed when they are dropped.
pub fn async_thread_cleanup() {
    pool::cleanup_thread()
}

/// Get the job pool stats of the calling thread, `None` if not initialized
pub fn thread_pool_stats() -> Option<AsyncJobPoolStats> {
    pool::stats()
}
