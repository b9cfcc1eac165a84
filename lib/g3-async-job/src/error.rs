/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use crate::AsyncStatusCode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsyncJobError {
    #[error("async job is not supported on this build")]
    NotCapable,
    #[error("not running inside an async job")]
    NotInJob,
    #[error("async job can not be started inside another async job")]
    NestedJob,
    #[error("async job can only be resumed on the thread that started it")]
    WrongThread,
    #[error("invalid pool size: init size {init_size} exceeds max size {max_size}")]
    InvalidPoolSize { max_size: usize, init_size: usize },
    #[error("async job pool already initialized on this thread")]
    PoolAlreadyInitialized,
    #[error("failed to allocate fibre stack: {0}")]
    StackAllocation(String),
    #[error("failed to swap context")]
    SwapContext,
    #[error("async job panicked: {0}")]
    JobPanicked(String),
}

impl AsyncJobError {
    pub fn get_type(&self) -> &str {
        match self {
            AsyncJobError::NotCapable => "NotCapable",
            AsyncJobError::NotInJob => "NotInJob",
            AsyncJobError::NestedJob => "NestedJob",
            AsyncJobError::WrongThread => "WrongThread",
            AsyncJobError::InvalidPoolSize { .. } => "InvalidPoolSize",
            AsyncJobError::PoolAlreadyInitialized => "PoolAlreadyInitialized",
            AsyncJobError::StackAllocation(_) => "StackAllocation",
            AsyncJobError::SwapContext => "SwapContext",
            AsyncJobError::JobPanicked(_) => "JobPanicked",
        }
    }

    /// Misuse errors are programming defects rather than runtime conditions
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            AsyncJobError::NotInJob | AsyncJobError::NestedJob | AsyncJobError::WrongThread
        )
    }

    #[inline]
    pub fn status_code(&self) -> AsyncStatusCode {
        AsyncStatusCode::Err
    }
}
