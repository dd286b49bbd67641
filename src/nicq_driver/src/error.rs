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

use nicq_common::{MappingError, RingError};
use thiserror::Error;

/// Why the device must be reset.
///
/// Every protocol violation maps to exactly one reason; the reason is what
/// the fault flag carries to the other queue pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResetReason {
    /// A TX completion named a request id that is out of range or not in flight.
    InvalidTxReqId = 1,
    /// An RX completion named a request id that is out of range or has no buffer.
    InvalidRxReqId = 2,
    /// A received packet spans more descriptors than the queue allows.
    TooManyRxDescs = 3,
    /// RX completion flags or reserved bits are inconsistent.
    RxDescriptorCorrupted = 4,
    /// Driver ring bookkeeping is inconsistent.
    DriverInvalidState = 5,
}

impl ResetReason {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::InvalidTxReqId),
            2 => Some(Self::InvalidRxReqId),
            3 => Some(Self::TooManyRxDescs),
            4 => Some(Self::RxDescriptorCorrupted),
            5 => Some(Self::DriverInvalidState),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTxReqId => "invalid_tx_req_id",
            Self::InvalidRxReqId => "invalid_rx_req_id",
            Self::TooManyRxDescs => "too_many_rx_descs",
            Self::RxDescriptorCorrupted => "rx_descriptor_corrupted",
            Self::DriverInvalidState => "driver_invalid_state",
        }
    }
}

/// Which ring a request id or completion belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

/// How an error is handled by the queue that hit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected request, reported to the caller.
    User,
    /// Allocation or mapping failure; the packet is dropped and the queue continues.
    Resource,
    /// Expected flow control, retry later.
    Backpressure,
    /// Descriptor corruption or firmware bug; the device must be reset.
    Protocol,
}

/// The error type for queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    /// The submission ring cannot take the descriptors a packet needs
    #[error("Not enough space in the submission queue: {needed} slots needed, {free} free")]
    NotEnoughSpace { needed: u16, free: u16 },

    /// The push header does not fit the device's limit
    #[error("Header of {len} bytes exceeds the {max} byte maximum")]
    HeaderTooLarge { len: usize, max: usize },

    /// Push placement requires the packet headers inline
    #[error("Push mode requires a header buffer")]
    MissingPushHeader,

    /// Packet has more segments than the queue accepts
    #[error("Packet has {count} buffers, at most {max} are allowed")]
    InvalidBufferCount { count: usize, max: usize },

    /// Invalid queue configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The local buffer cache cannot be enabled on this queue
    #[error("Buffer cache unsupported with {queue_count} queues (hook attached: {hook_attached})")]
    CacheUnsupported { queue_count: u16, hook_attached: bool },

    /// Push-mode burst budget is exhausted until the next doorbell
    #[error("Push burst budget exhausted")]
    WouldBlock,

    /// No request id is free
    #[error("No free {0:?} request id")]
    NoFreeRequestId(Direction),

    /// Receive buffer allocation failed
    #[error("Buffer allocation failed: {0}")]
    Alloc(MappingError),

    /// DMA mapping of packet memory failed
    #[error("DMA mapping failed: {0}")]
    DmaMapping(MappingError),

    /// Push placement without a bounce line
    #[error("No bounce line available in push mode")]
    BounceBufferMissing,

    /// A completion opened a new packet while another was still incomplete
    #[error("Completion at {head} has FIRST set with {pending} descriptors pending")]
    UnexpectedFirstFlag { head: u16, pending: u16 },

    /// Must-be-zero completion bits were set
    #[error("Reserved completion bits set: {status:#010x}")]
    ReservedBitsSet { status: u32 },

    /// A completion request id was beyond the queue depth
    #[error("{dir:?} request id {req_id} out of range for depth {depth}")]
    InvalidRequestId { dir: Direction, req_id: u16, depth: u16 },

    /// A completion request id was never submitted or already retired
    #[error("{dir:?} request id {req_id} completed but not outstanding")]
    RequestIdNotOutstanding { dir: Direction, req_id: u16 },

    /// A packet spanned more descriptors than the queue allows
    #[error("Packet spans {count} descriptors, at most {max} are allowed")]
    TooManyRxDescs { count: u16, max: u16 },

    /// Ring bookkeeping or memory access failed
    #[error("Ring error: {0}")]
    Ring(#[from] RingError),

    /// The device-wide fault flag is set
    #[error("Device needs reset: {}", .0.as_str())]
    DeviceNeedsReset(ResetReason),
}

impl QueueError {
    /// The reset this error demands, if it is a protocol violation.
    pub fn reset_reason(&self) -> Option<ResetReason> {
        match self {
            QueueError::UnexpectedFirstFlag { .. } | QueueError::ReservedBitsSet { .. } => {
                Some(ResetReason::RxDescriptorCorrupted)
            }
            QueueError::InvalidRequestId { dir, .. }
            | QueueError::RequestIdNotOutstanding { dir, .. } => Some(match dir {
                Direction::Tx => ResetReason::InvalidTxReqId,
                Direction::Rx => ResetReason::InvalidRxReqId,
            }),
            QueueError::TooManyRxDescs { .. } => Some(ResetReason::TooManyRxDescs),
            QueueError::BounceBufferMissing => Some(ResetReason::DriverInvalidState),
            QueueError::Ring(RingError::Full) => None,
            QueueError::Ring(
                RingError::InvalidLayout | RingError::InvalidState | RingError::MemError,
            ) => Some(ResetReason::DriverInvalidState),
            QueueError::DeviceNeedsReset(reason) => Some(*reason),
            QueueError::NotEnoughSpace { .. }
            | QueueError::HeaderTooLarge { .. }
            | QueueError::MissingPushHeader
            | QueueError::InvalidBufferCount { .. }
            | QueueError::InvalidConfig(_)
            | QueueError::CacheUnsupported { .. }
            | QueueError::WouldBlock
            | QueueError::NoFreeRequestId(_)
            | QueueError::Alloc(_)
            | QueueError::DmaMapping(_) => None,
        }
    }

    /// Check if the error requires tearing down and recreating the queues
    pub fn is_fatal(&self) -> bool {
        self.reset_reason().is_some()
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_fatal() {
            return ErrorCategory::Protocol;
        }
        match self {
            QueueError::NotEnoughSpace { .. }
            | QueueError::WouldBlock
            | QueueError::NoFreeRequestId(_)
            | QueueError::Ring(RingError::Full) => ErrorCategory::Backpressure,
            QueueError::Alloc(_) | QueueError::DmaMapping(_) => ErrorCategory::Resource,
            _ => ErrorCategory::User,
        }
    }

    /// Short label used for drop counters.
    pub fn label(&self) -> &'static str {
        match self {
            QueueError::NotEnoughSpace { .. } => "not_enough_space",
            QueueError::HeaderTooLarge { .. } => "header_too_large",
            QueueError::MissingPushHeader => "missing_push_header",
            QueueError::InvalidBufferCount { .. } => "invalid_buffer_count",
            QueueError::InvalidConfig(_) => "invalid_config",
            QueueError::CacheUnsupported { .. } => "cache_unsupported",
            QueueError::WouldBlock => "would_block",
            QueueError::NoFreeRequestId(_) => "no_free_req_id",
            QueueError::Alloc(_) => "alloc",
            QueueError::DmaMapping(_) => "dma_mapping",
            QueueError::BounceBufferMissing => "bounce_buffer_missing",
            QueueError::UnexpectedFirstFlag { .. } => "unexpected_first_flag",
            QueueError::ReservedBitsSet { .. } => "reserved_bits_set",
            QueueError::InvalidRequestId { .. } => "invalid_req_id",
            QueueError::RequestIdNotOutstanding { .. } => "req_id_not_outstanding",
            QueueError::TooManyRxDescs { .. } => "too_many_rx_descs",
            QueueError::Ring(_) => "ring",
            QueueError::DeviceNeedsReset(_) => "device_needs_reset",
        }
    }
}

pub type Result<T> = core::result::Result<T, QueueError>;
