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

//! Per-queue counters. All of them only ever increase.

use crate::error::{ErrorCategory, QueueError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxStats {
    pub packets: u64,
    pub bytes: u64,
    /// Packets returned by the device.
    pub completed: u64,
    pub doorbells: u64,
    pub meta_descs: u64,
    /// Packets sent with the device's cached metadata.
    pub meta_cache_hits: u64,
    /// Push-mode lines written to device memory.
    pub llq_lines: u64,
    pub not_enough_space: u64,
    pub would_block: u64,
    pub dma_mapping_err: u64,
    pub bad_packet: u64,
    pub bad_req_id: u64,
}

impl TxStats {
    pub(crate) fn record_error(&mut self, err: &QueueError) {
        match err {
            QueueError::NotEnoughSpace { .. } | QueueError::NoFreeRequestId(_) => {
                self.not_enough_space += 1
            }
            QueueError::WouldBlock => self.would_block += 1,
            QueueError::DmaMapping(_) => self.dma_mapping_err += 1,
            QueueError::InvalidRequestId { .. } | QueueError::RequestIdNotOutstanding { .. } => {
                self.bad_req_id += 1
            }
            err if err.category() == ErrorCategory::User => self.bad_packet += 1,
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxStats {
    pub packets: u64,
    pub bytes: u64,
    /// Buffers posted to the device.
    pub refilled: u64,
    /// Polls that found a packet still being written.
    pub partial: u64,
    pub alloc_fail: u64,
    pub csum_bad: u64,
    pub bad_desc: u64,
    pub bad_req_id: u64,
}

impl RxStats {
    pub(crate) fn record_error(&mut self, err: &QueueError) {
        match err {
            QueueError::Alloc(_) => self.alloc_fail += 1,
            QueueError::InvalidRequestId { .. } | QueueError::RequestIdNotOutstanding { .. } => {
                self.bad_req_id += 1
            }
            QueueError::UnexpectedFirstFlag { .. }
            | QueueError::ReservedBitsSet { .. }
            | QueueError::TooManyRxDescs { .. } => self.bad_desc += 1,
            _ => {}
        }
    }
}

/// Local buffer cache decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LpcStats {
    /// Buffers added while the cache was warming up.
    pub warm_up: u64,
    /// Buffers reused from the cache.
    pub reused: u64,
    /// Allocations made outside the cache because the next buffer was still in use.
    pub full: u64,
    /// Cached buffers replaced because they lived on another NUMA node.
    pub wrong_numa: u64,
    /// Allocations made while the cache is disabled.
    pub uncached: u64,
    /// Failed allocations for a cache slot. The slot stays empty until the
    /// next request reaches it.
    pub alloc_fail: u64,
}
