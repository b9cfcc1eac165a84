/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::cell::Cell;

use context::stack::ProtectedFixedSizeStack;
use context::{Context, Transfer};
use log::trace;

use super::FibreYield;
use crate::AsyncJobError;

pub(crate) const CAPABLE: bool = true;

thread_local! {
    /// The context that switched into the running fibre
    static DISPATCHER: Cell<Option<Context>> = const { Cell::new(None) };
}

/// A reusable execution context with its own guarded stack
///
/// A fresh fibre enters `fibre_main`, which runs the current job of this
/// thread and then yields `Finish`. Resuming a finished fibre runs the next
/// current job on the same stack.
pub(crate) struct Fibre {
    ctx: Option<Context>,
    _stack: ProtectedFixedSizeStack,
}

impl Fibre {
    pub(crate) fn new(stack_size: usize) -> Result<Self, AsyncJobError> {
        let stack = ProtectedFixedSizeStack::new(stack_size)
            .map_err(|e| AsyncJobError::StackAllocation(e.to_string()))?;
        // the stack is owned by the fibre and outlives the context
        let ctx = unsafe { Context::new(&stack, fibre_main) };
        trace!("created fibre with {stack_size} bytes stack");
        Ok(Fibre {
            ctx: Some(ctx),
            _stack: stack,
        })
    }

    /// Switch into the fibre and wait until it pauses or finishes the job
    pub(crate) fn resume(&mut self) -> Result<FibreYield, AsyncJobError> {
        let ctx = self.ctx.take().ok_or(AsyncJobError::SwapContext)?;
        let t = unsafe { ctx.resume(0) };
        self.ctx = Some(t.context);
        FibreYield::from_data(t.data).ok_or(AsyncJobError::SwapContext)
    }
}

/// Switch from the running fibre back to its dispatcher
///
/// Returns once the dispatcher resumes this fibre again.
pub(crate) fn suspend(reason: FibreYield) -> Result<(), AsyncJobError> {
    let dispatcher = DISPATCHER
        .with(|cell| cell.take())
        .ok_or(AsyncJobError::SwapContext)?;
    let t = unsafe { dispatcher.resume(reason.as_data()) };
    DISPATCHER.with(|cell| cell.set(Some(t.context)));
    Ok(())
}

extern "C" fn fibre_main(t: Transfer) -> ! {
    DISPATCHER.with(|cell| cell.set(Some(t.context)));
    loop {
        crate::job::run_current();
        if suspend(FibreYield::Finish).is_err() {
            // no way back to the dispatcher, and unwinding out of here is not allowed
            std::process::abort();
        }
    }
}
