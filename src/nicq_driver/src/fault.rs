/*
Copyright 2026  The nicq Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{Span, error, instrument, warn};

use crate::error::{QueueError, ResetReason, Result};
use crate::metrics::{CounterMetric, EmittableMetric};

const NO_FAULT: u8 = 0;

/// Device-wide "needs reset" flag shared by every queue pair of a device.
///
/// The first reason recorded wins; later triggers are logged and ignored
/// until the owner recreates the queues and calls [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct DeviceFault {
    reason: AtomicU8,
}

impl DeviceFault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record that the device must be reset.
    ///
    /// Returns true if this call set the flag.
    pub fn trigger(&self, reason: ResetReason) -> bool {
        match self.reason.compare_exchange(
            NO_FAULT,
            reason as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                error!(reason = reason.as_str(), "device needs reset");
                CounterMetric::device_reset(reason).emit();
                true
            }
            Err(previous) => {
                warn!(
                    reason = reason.as_str(),
                    previous = ?ResetReason::from_code(previous),
                    "device reset already pending"
                );
                false
            }
        }
    }

    /// Fail with [`QueueError::DeviceNeedsReset`] when the flag is set.
    #[inline]
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(QueueError::DeviceNeedsReset(reason)),
            None => Ok(()),
        }
    }

    pub fn reason(&self) -> Option<ResetReason> {
        ResetReason::from_code(self.reason.load(Ordering::Acquire))
    }

    pub fn is_set(&self) -> bool {
        self.reason().is_some()
    }

    /// Clear the flag once the queues have been recreated.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn clear(&self) {
        self.reason.store(NO_FAULT, Ordering::Release);
    }
}
