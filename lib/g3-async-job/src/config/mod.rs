/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;

#[cfg(feature = "yaml")]
mod yaml;

pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Thread local job pool config
///
/// A `max_size` of 0 means the pool may grow without limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncJobPoolConfig {
    max_size: usize,
    init_size: usize,
    stack_size: usize,
}

impl Default for AsyncJobPoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncJobPoolConfig {
    pub fn new() -> Self {
        AsyncJobPoolConfig {
            max_size: 0,
            init_size: 0,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    pub fn with_size(max_size: usize, init_size: usize) -> Self {
        let mut config = AsyncJobPoolConfig::new();
        config.set_max_size(max_size);
        config.set_init_size(init_size);
        config
    }

    pub fn set_max_size(&mut self, size: usize) {
        self.max_size = size;
    }

    pub fn set_init_size(&mut self, size: usize) {
        self.init_size = size;
    }

    pub fn set_stack_size(&mut self, size: usize) {
        self.stack_size = size.max(MIN_STACK_SIZE);
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn init_size(&self) -> usize {
        self.init_size
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    #[inline]
    pub(crate) fn is_size_valid(&self) -> bool {
        self.max_size == 0 || self.init_size <= self.max_size
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if !self.is_size_valid() {
            return Err(anyhow!(
                "init size {} should not be larger than max size {}",
                self.init_size,
                self.max_size
            ));
        }
        Ok(())
    }
}
