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

#[macro_use]
pub(crate) mod metrics_macro;

use crate::error::{QueueError, ResetReason};

// These define all the counters of this crate
define_counters! {
    CounterMetric {
        TxDropped { reason } => {
            name: "nicq_tx_dropped_total",
            description: "Number of packets dropped on the transmit path",
            unit: metrics::Unit::Count,
        },
        RxDropped { reason } => {
            name: "nicq_rx_dropped_total",
            description: "Number of packets dropped on the receive path",
            unit: metrics::Unit::Count,
        },
        DeviceResets { reason } => {
            name: "nicq_device_resets_total",
            description: "Number of times a queue requested a device reset",
            unit: metrics::Unit::Count,
        },
        LpcEvents { event } => {
            name: "nicq_lpc_events_total",
            description: "Local buffer cache decisions other than plain reuse",
            unit: metrics::Unit::Count,
        },
    }
}

impl CounterMetric {
    /// Create a new transmit drop metric, ready to be emitted
    #[must_use]
    pub(crate) fn tx_dropped(err: &QueueError) -> Self {
        CounterMetric::TxDropped {
            reason: err.label(),
        }
    }

    /// Create a new receive drop metric, ready to be emitted
    #[must_use]
    pub(crate) fn rx_dropped(err: &QueueError) -> Self {
        CounterMetric::RxDropped {
            reason: err.label(),
        }
    }

    /// Create a new device reset metric, ready to be emitted
    #[must_use]
    pub(crate) fn device_reset(reason: ResetReason) -> Self {
        CounterMetric::DeviceResets {
            reason: reason.as_str(),
        }
    }

    /// Create a new buffer cache metric, ready to be emitted
    #[must_use]
    pub(crate) fn lpc_event(event: &'static str) -> Self {
        CounterMetric::LpcEvents { event }
    }
}

/// A metric which can be emitted to the underlying metrics system
pub(crate) trait EmittableMetric {
    /// Emits the metric to the underlying metrics system.
    /// The first time this is called for a given metric variant, it will
    /// also describe the metric to the underlying metrics system.
    fn emit(self);
}
