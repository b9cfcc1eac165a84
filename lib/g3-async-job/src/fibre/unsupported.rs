/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::FibreYield;
use crate::AsyncJobError;

pub(crate) const CAPABLE: bool = false;

pub(crate) struct Fibre {}

impl Fibre {
    pub(crate) fn new(_stack_size: usize) -> Result<Self, AsyncJobError> {
        Err(AsyncJobError::NotCapable)
    }

    pub(crate) fn resume(&mut self) -> Result<FibreYield, AsyncJobError> {
        Err(AsyncJobError::NotCapable)
    }
}

pub(crate) fn suspend(_reason: FibreYield) -> Result<(), AsyncJobError> {
    Err(AsyncJobError::NotCapable)
}
