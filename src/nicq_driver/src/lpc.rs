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

//! Local buffer cache: pre-mapped receive buffers reused across packets.
//!
//! A buffer is shared between the cache and whoever currently holds the
//! packet built on it. The cache only hands a slot out again once it holds
//! the last reference. Buffers are unmapped and freed when the last
//! reference drops.

use std::cmp::min;
use std::sync::Arc;

use nicq_common::{BufferAllocator, MappedRegion, NumaNode};
use tracing::{Span, debug, error, info, instrument};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::stats::LpcStats;

/// Cache slots per unit of multiplier.
pub const LPC_UNIT: usize = 1024;

/// Fewest queues a device needs for the cache to be enabled.
pub const MIN_QUEUES: u16 = 16;

/// A receive buffer owned by the allocator that mapped it.
pub struct MappedBuffer {
    region: MappedRegion,
    allocator: Arc<dyn BufferAllocator>,
}

impl MappedBuffer {
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    pub fn device_addr(&self) -> u64 {
        self.region.device_addr
    }

    pub fn len(&self) -> u32 {
        self.region.len
    }

    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    pub fn node(&self) -> NumaNode {
        self.region.node
    }
}

impl core::fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        self.allocator.unmap_free(self.region);
    }
}

pub type RxBuffer = Arc<MappedBuffer>;

pub struct LocalBufferCache {
    allocator: Arc<dyn BufferAllocator>,
    slots: Vec<Option<RxBuffer>>,
    head: usize,
    current_size: usize,
    buf_len: u32,
    stats: LpcStats,
}

impl LocalBufferCache {
    /// Number of slots for `multiplier`. Zero disables the cache.
    pub fn capacity_for(multiplier: u8) -> usize {
        match min(multiplier, QueueConfig::MAX_LPC_MULTIPLIER) {
            0 => 0,
            m => (m as usize * LPC_UNIT).next_power_of_two(),
        }
    }

    pub fn new(allocator: Arc<dyn BufferAllocator>, multiplier: u8, buf_len: u32) -> Self {
        Self::with_capacity(allocator, Self::capacity_for(multiplier), buf_len)
    }

    /// A cache of `capacity` slots, rounded up to a power of two.
    pub fn with_capacity(allocator: Arc<dyn BufferAllocator>, capacity: usize, buf_len: u32) -> Self {
        let capacity = if capacity == 0 {
            0
        } else {
            capacity.next_power_of_two()
        };
        Self {
            allocator,
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            current_size: 0,
            buf_len,
            stats: LpcStats::default(),
        }
    }

    /// Whether a device with `queue_count` queues can use the cache.
    ///
    /// `strict` reports a refusal as an error rather than as information.
    pub fn is_cache_supported(queue_count: u16, hook_attached: bool, strict: bool) -> bool {
        let reason = if queue_count < MIN_QUEUES {
            "too few queues"
        } else if hook_attached {
            "a packet processing hook is attached"
        } else {
            return true;
        };

        if strict {
            error!(queue_count, min_queues = MIN_QUEUES, reason, "buffer cache unsupported");
        } else {
            info!(queue_count, min_queues = MIN_QUEUES, reason, "buffer cache disabled");
        }
        false
    }

    pub fn is_enabled(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.slots.len()
    }

    /// Slots filled so far.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn stats(&self) -> &LpcStats {
        &self.stats
    }

    /// Change the cache size at runtime.
    ///
    /// Enabling is refused on a device that cannot use the cache. Any
    /// resize drops the cached buffers; those still in use stay alive with
    /// their holders.
    #[instrument(err(Debug), skip(self), parent = Span::current(), level= "Trace")]
    pub fn set_multiplier(&mut self, multiplier: u8, queue_count: u16, hook_attached: bool) -> Result<()> {
        if multiplier > 0 && !Self::is_cache_supported(queue_count, hook_attached, true) {
            return Err(QueueError::CacheUnsupported {
                queue_count,
                hook_attached,
            });
        }

        let capacity = Self::capacity_for(multiplier);
        if capacity != self.slots.len() {
            self.teardown();
            self.slots = (0..capacity).map(|_| None).collect();
        }
        Ok(())
    }

    /// Hand out a receive buffer for the caller running on `node`.
    pub fn get_buffer(&mut self, node: NumaNode) -> Result<RxBuffer> {
        let max_size = self.slots.len();
        if max_size == 0 {
            self.stats.uncached += 1;
            return self.alloc(node);
        }

        if self.current_size < max_size {
            return self.warm_up(node);
        }

        let head = self.head;
        match &self.slots[head] {
            Some(buf) if Arc::strong_count(buf) > 1 => {
                self.stats.full += 1;
                CounterMetric::lpc_event("full").emit();
                return self.alloc(node);
            }
            Some(buf) if buf.node() == node => {
                let buf = buf.clone();
                self.stats.reused += 1;
                self.head = (head + 1) & (max_size - 1);
                return Ok(buf);
            }
            Some(buf) => {
                let from = buf.node();
                debug!(slot = head, ?node, ?from, "evicting cached buffer from another NUMA node");
                self.slots[head] = None;
                self.stats.wrong_numa += 1;
                CounterMetric::lpc_event("wrong_numa").emit();
            }
            None => {}
        }

        // The slot is empty: its buffer was evicted or its allocation failed.
        let fresh = match self.alloc(node) {
            Ok(fresh) => fresh,
            Err(e) => {
                self.stats.alloc_fail += 1;
                return Err(e);
            }
        };
        self.slots[head] = Some(fresh.clone());
        self.head = (head + 1) & (max_size - 1);
        Ok(fresh)
    }

    fn warm_up(&mut self, node: NumaNode) -> Result<RxBuffer> {
        if self.current_size > 0 {
            if let Some(buf) = &self.slots[self.head] {
                if Arc::strong_count(buf) == 1 {
                    let buf = buf.clone();
                    self.head = (self.head + 1) % self.current_size;
                    self.stats.reused += 1;
                    return Ok(buf);
                }
            }
        }

        let buf = self.alloc(node)?;
        self.slots[self.current_size] = Some(buf.clone());
        self.current_size += 1;
        self.stats.warm_up += 1;
        Ok(buf)
    }

    fn alloc(&mut self, node: NumaNode) -> Result<RxBuffer> {
        let region = self
            .allocator
            .alloc_mapped(self.buf_len, node)
            .map_err(QueueError::Alloc)?;
        Ok(Arc::new(MappedBuffer {
            region,
            allocator: self.allocator.clone(),
        }))
    }

    /// Drop every cached buffer.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn teardown(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.take();
        }
        self.head = 0;
        self.current_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use nicq_testing::FakeAllocator;

    use super::*;

    fn cache(capacity: usize) -> (LocalBufferCache, Arc<FakeAllocator>) {
        let allocator = Arc::new(FakeAllocator::new());
        (
            LocalBufferCache::with_capacity(allocator.clone(), capacity, 2048),
            allocator,
        )
    }

    #[test]
    fn capacity_from_multiplier() {
        assert_eq!(LocalBufferCache::capacity_for(0), 0);
        assert_eq!(LocalBufferCache::capacity_for(1), 1024);
        assert_eq!(LocalBufferCache::capacity_for(2), 2048);
        assert_eq!(LocalBufferCache::capacity_for(3), 4096);
        assert_eq!(LocalBufferCache::capacity_for(200), 32 * 1024);
    }

    #[test]
    fn warm_up_then_reuse() {
        let (mut lpc, allocator) = cache(4);
        let node = NumaNode(0);

        let mut held = Vec::new();
        for size in 1..=4 {
            held.push(lpc.get_buffer(node).unwrap());
            assert_eq!(lpc.current_size(), size);
        }
        assert_eq!(allocator.allocs(), 4);

        let first = held.remove(0);
        let handle = first.region().handle;
        drop(first);

        let again = lpc.get_buffer(node).unwrap();
        assert_eq!(again.region().handle, handle);
        assert_eq!(allocator.allocs(), 4);
        assert_eq!(lpc.stats().reused, 1);
    }

    #[test]
    fn warm_up_reuses_a_released_head() {
        let (mut lpc, allocator) = cache(4);
        let node = NumaNode(0);

        let first = lpc.get_buffer(node).unwrap();
        let handle = first.region().handle;
        drop(first);

        let second = lpc.get_buffer(node).unwrap();
        assert_eq!(second.region().handle, handle);
        assert_eq!(lpc.current_size(), 1);
        assert_eq!(allocator.allocs(), 1);
    }

    #[test]
    fn buffer_in_use_overflows() {
        let (mut lpc, allocator) = cache(2);
        let node = NumaNode(0);
        let a = lpc.get_buffer(node).unwrap();
        let _b = lpc.get_buffer(node).unwrap();

        let overflow = lpc.get_buffer(node).unwrap();
        assert_ne!(overflow.region().handle, a.region().handle);
        assert_eq!(lpc.stats().full, 1);
        assert_eq!(allocator.allocs(), 3);

        drop(overflow);
        assert_eq!(allocator.frees(), 1, "overflow buffers are not cached");
    }

    #[test]
    fn wrong_numa_is_replaced_in_place() {
        let (mut lpc, allocator) = cache(2);
        let held: Vec<_> = (0..2).map(|_| lpc.get_buffer(NumaNode(0)).unwrap()).collect();
        assert_eq!(lpc.current_size(), 2);
        drop(held);

        allocator.set_node(NumaNode(1));
        let buf = lpc.get_buffer(NumaNode(1)).unwrap();
        assert_eq!(buf.node(), NumaNode(1));
        assert_eq!(lpc.stats().wrong_numa, 1);
        assert_eq!(allocator.frees(), 1);
        assert_eq!(allocator.live(), 2);
    }

    #[test]
    fn failed_numa_replacement_leaves_the_slot_empty() {
        let (mut lpc, allocator) = cache(2);
        let held: Vec<_> = (0..2).map(|_| lpc.get_buffer(NumaNode(0)).unwrap()).collect();
        assert_eq!(lpc.current_size(), 2);
        drop(held);

        allocator.fail_allocations(true);
        let err = lpc.get_buffer(NumaNode(1)).unwrap_err();
        assert!(matches!(err, QueueError::Alloc(_)));
        assert!(!err.is_fatal());
        assert_eq!(lpc.stats().wrong_numa, 1);
        assert_eq!(lpc.stats().alloc_fail, 1);
        assert_eq!(allocator.frees(), 1, "evicted buffer is released");
        assert_eq!(allocator.live(), 1);

        // The next request for that slot fills it again.
        allocator.fail_allocations(false);
        allocator.set_node(NumaNode(1));
        let buf = lpc.get_buffer(NumaNode(1)).unwrap();
        assert_eq!(buf.node(), NumaNode(1));
        assert_eq!(lpc.stats().wrong_numa, 1);
        assert_eq!(lpc.current_size(), 2);
        assert_eq!(allocator.live(), 2);
    }

    #[test]
    fn disabled_cache_allocates_every_time() {
        let (mut lpc, allocator) = cache(0);
        assert!(!lpc.is_enabled());
        let a = lpc.get_buffer(NumaNode(0)).unwrap();
        drop(a);
        lpc.get_buffer(NumaNode(0)).unwrap();
        assert_eq!(allocator.allocs(), 2);
        assert_eq!(lpc.stats().uncached, 2);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let (mut lpc, allocator) = cache(2);
        allocator.fail_allocations(true);
        assert!(matches!(
            lpc.get_buffer(NumaNode(0)),
            Err(QueueError::Alloc(_))
        ));
        assert_eq!(lpc.current_size(), 0);
    }

    #[test]
    fn support_requires_enough_queues_and_no_hook() {
        assert!(LocalBufferCache::is_cache_supported(16, false, true));
        assert!(!LocalBufferCache::is_cache_supported(8, false, false));
        assert!(!LocalBufferCache::is_cache_supported(32, true, false));
    }

    #[test]
    fn enabling_is_refused_when_unsupported() {
        let (mut lpc, _allocator) = cache(0);
        let err = lpc.set_multiplier(1, 4, false).unwrap_err();
        assert!(matches!(
            err,
            QueueError::CacheUnsupported {
                queue_count: 4,
                hook_attached: false
            }
        ));
        assert!(!lpc.is_enabled());

        lpc.set_multiplier(1, 16, false).unwrap();
        assert_eq!(lpc.max_size(), 1024);
        lpc.set_multiplier(0, 4, true).unwrap();
        assert!(!lpc.is_enabled());
    }

    #[test]
    fn teardown_frees_idle_buffers_only() {
        let (mut lpc, allocator) = cache(4);
        let held = lpc.get_buffer(NumaNode(0)).unwrap();
        let idle = lpc.get_buffer(NumaNode(0)).unwrap();
        drop(idle);

        lpc.teardown();
        assert_eq!(allocator.frees(), 1);
        assert!(allocator.is_live(held.region().handle));
        drop(held);
        assert_eq!(allocator.live(), 0);
        assert_eq!(allocator.double_frees(), 0);
    }
}
