/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

/// Raw status codes as reported by the C style job API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AsyncStatusCode {
    Err = 0,
    NoJobs = 1,
    Pause = 2,
    Finish = 3,
}

impl AsyncStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncStatusCode::Err => "ERR",
            AsyncStatusCode::NoJobs => "NO_JOBS",
            AsyncStatusCode::Pause => "PAUSE",
            AsyncStatusCode::Finish => "FINISH",
        }
    }
}

impl TryFrom<i32> for AsyncStatusCode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AsyncStatusCode::Err),
            1 => Ok(AsyncStatusCode::NoJobs),
            2 => Ok(AsyncStatusCode::Pause),
            3 => Ok(AsyncStatusCode::Finish),
            n => Err(n),
        }
    }
}

impl fmt::Display for AsyncStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-error outcome of [`start_job`](crate::start_job)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartJobStatus {
    /// The thread pool is exhausted, retry later
    NoJobs,
    /// The job paused, resume it by calling `start_job` with the same handle
    Pause,
    /// The job function returned with this value
    Finish(i32),
}

impl StartJobStatus {
    pub fn code(&self) -> AsyncStatusCode {
        match self {
            StartJobStatus::NoJobs => AsyncStatusCode::NoJobs,
            StartJobStatus::Pause => AsyncStatusCode::Pause,
            StartJobStatus::Finish(_) => AsyncStatusCode::Finish,
        }
    }
}
