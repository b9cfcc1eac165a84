/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

#[cfg(feature = "fibre")]
mod switch;
#[cfg(feature = "fibre")]
pub(crate) use switch::{CAPABLE, Fibre, suspend};

#[cfg(not(feature = "fibre"))]
mod unsupported;
#[cfg(not(feature = "fibre"))]
pub(crate) use unsupported::{CAPABLE, Fibre, suspend};

/// Why a fibre handed control back to its dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FibreYield {
    Pause,
    Finish,
}

#[cfg(feature = "fibre")]
impl FibreYield {
    const PAUSE: usize = 1;
    const FINISH: usize = 2;

    fn as_data(self) -> usize {
        match self {
            FibreYield::Pause => Self::PAUSE,
            FibreYield::Finish => Self::FINISH,
        }
    }

    fn from_data(data: usize) -> Option<Self> {
        match data {
            Self::PAUSE => Some(FibreYield::Pause),
            Self::FINISH => Some(FibreYield::Finish),
            _ => None,
        }
    }
}
