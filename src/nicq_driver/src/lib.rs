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
#![warn(dead_code, unused_mut)]
//! This crate drives the queue pairs of a NIC: descriptor submission, completion
//! processing, packet reassembly and receive buffer caching.
//! The device side is reached through the collaborator traits of `nicq-common`.
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

/// Queue configuration
pub mod config;
/// Completion queue
pub mod cq;
/// Errors returned by the queues
pub mod error;
/// The device-wide fault flag
pub mod fault;
/// Receive buffer cache
pub mod lpc;
/// Counters emitted to the `metrics` facade
pub(crate) mod metrics;
/// Queue pair assembly and polling
pub mod queue_pair;
/// Receive path
pub mod rx;
/// Submission queue, in host memory or pushed to the device
pub mod sq;
/// Per-queue statistics
pub mod stats;
/// Transmit path
pub mod tx;

pub use config::{LlqConfig, Placement, QueueConfig};
pub use cq::{CompletionKind, CompletionQueue, PartialPacket};
pub use error::{Direction, ErrorCategory, QueueError, ResetReason, Result};
pub use fault::DeviceFault;
pub use lpc::{LocalBufferCache, MappedBuffer, RxBuffer};
pub use queue_pair::{PollSummary, QueuePair, QueueResources, RingMemory, RingSizes};
pub use rx::{RxEngine, RxMeta, RxOutcome, RxPacket, RxQueue, RxSegment, RxSink};
pub use sq::SubmissionQueue;
pub use stats::{LpcStats, RxStats, TxStats};
pub use tx::{
    Rejected, Segment, SharedTxQueue, TxBuffer, TxContext, TxEngine, TxPacket, TxPrepared,
    TxQueue, TxSink,
};
