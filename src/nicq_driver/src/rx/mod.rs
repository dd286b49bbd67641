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

//! Receive queue: buffer posting, packet delivery and refill.

pub mod engine;

use std::sync::Arc;

pub use engine::{RxBufInfo, RxCompletedPacket, RxEngine, RxMeta, RxOutcome};
use nicq_common::desc::RxDesc;
use nicq_common::{DeviceMem, Doorbell, NumaNode};
use smallvec::SmallVec;
use tracing::{Span, debug, instrument, trace};

use crate::cq::CompletionQueue;
use crate::error::{Direction, ErrorCategory, QueueError, Result};
use crate::fault::DeviceFault;
use crate::lpc::{LocalBufferCache, RxBuffer};
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::sq::SubmissionQueue;
use crate::stats::{LpcStats, RxStats};

/// Part of a received packet within one buffer.
#[derive(Clone, Debug)]
pub struct RxSegment {
    pub buffer: RxBuffer,
    pub offset: u16,
    pub len: u16,
}

/// A received packet as handed to the network stack.
#[derive(Clone, Debug)]
pub struct RxPacket {
    pub segments: SmallVec<[RxSegment; 4]>,
    pub meta: RxMeta,
}

impl RxPacket {
    /// Total packet length in bytes.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives packets as they complete.
pub trait RxSink {
    fn deliver(&mut self, packet: RxPacket);
}

impl<F: FnMut(RxPacket)> RxSink for F {
    fn deliver(&mut self, packet: RxPacket) {
        self(packet)
    }
}

/// How the queue replenishes its receive buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxRefill {
    /// NUMA node of the worker polling the queue.
    pub node: NumaNode,
    /// Length advertised for each posted buffer.
    pub buf_len: u16,
    /// Refill once at least this many slots are free.
    pub threshold: u16,
}

pub struct RxQueue<M, D> {
    qid: u16,
    sq: SubmissionQueue<M, D>,
    cq: CompletionQueue<M>,
    engine: RxEngine,
    rx_info: Vec<Option<RxBuffer>>,
    free_ids: Vec<u16>,
    lpc: LocalBufferCache,
    refill: RxRefill,
    fault: Arc<DeviceFault>,
    stats: RxStats,
}

impl<M: DeviceMem, D: Doorbell> RxQueue<M, D> {
    pub fn new(
        qid: u16,
        sq: SubmissionQueue<M, D>,
        cq: CompletionQueue<M>,
        engine: RxEngine,
        lpc: LocalBufferCache,
        refill: RxRefill,
        fault: Arc<DeviceFault>,
    ) -> Self {
        let depth = sq.depth();
        Self {
            qid,
            sq,
            cq,
            engine,
            rx_info: (0..depth).map(|_| None).collect(),
            free_ids: (0..depth).rev().collect(),
            lpc,
            refill,
            fault,
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn lpc_stats(&self) -> &LpcStats {
        self.lpc.stats()
    }

    pub fn lpc_mut(&mut self) -> &mut LocalBufferCache {
        &mut self.lpc
    }

    pub fn cq(&self) -> &CompletionQueue<M> {
        &self.cq
    }

    /// Buffers currently owned by the device.
    pub fn posted(&self) -> u16 {
        self.sq.depth() - self.free_ids.len() as u16
    }

    /// Slots that can be posted while keeping one slot unused.
    fn missing(&self) -> u16 {
        (self.free_ids.len() as u16).saturating_sub(1)
    }

    /// Post buffers until all but one slot are in use.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace")]
    pub fn fill(&mut self) -> Result<u16> {
        let missing = self.missing();
        self.refill(missing)
    }

    /// Post up to `n` fresh buffers and ring the doorbell.
    ///
    /// Allocation failures end the refill early and are only counted; the
    /// next poll tries again. Nothing is posted once the device is faulted.
    pub fn refill(&mut self, n: u16) -> Result<u16> {
        self.fault.check()?;

        let mut posted = 0;
        while posted < n {
            let Some(req_id) = self.free_ids.pop() else {
                break;
            };

            let buffer = match self.lpc.get_buffer(self.refill.node) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.free_ids.push(req_id);
                    debug!(qid = self.qid, error = %e, "RX buffer allocation failed");
                    self.stats.record_error(&e);
                    break;
                }
            };

            let desc = RxDesc::new(req_id, buffer.device_addr(), self.refill.buf_len);
            if let Err(e) = self.sq.submit(desc) {
                self.free_ids.push(req_id);
                return Err(self.escalate(e));
            }
            self.rx_info[req_id as usize] = Some(buffer);
            posted += 1;
        }

        if posted > 0 {
            self.stats.refilled += posted as u64;
            self.sq.notify();
            trace!(qid = self.qid, posted, "RX refill");
        }
        Ok(posted)
    }

    /// Deliver up to `budget` packets to `sink`, then refill when enough
    /// slots are free.
    pub fn poll<S: RxSink>(&mut self, budget: usize, sink: &mut S) -> Result<usize> {
        self.fault.check()?;

        let mut done = 0;
        while done < budget {
            let completed = match self.engine.receive_one(&mut self.cq) {
                Ok(RxOutcome::Packet(completed)) => completed,
                Ok(RxOutcome::Pending { .. }) => {
                    self.stats.partial += 1;
                    break;
                }
                Ok(RxOutcome::Empty) => break,
                Err(e) => return Err(self.escalate(e)),
            };

            let packet = match self.take_packet(&completed) {
                Ok(packet) => packet,
                Err(e) => return Err(self.escalate(e)),
            };

            if packet.meta.l3_csum_err || packet.meta.l4_csum_err {
                self.stats.csum_bad += 1;
            }
            self.stats.packets += 1;
            self.stats.bytes += packet.len() as u64;
            sink.deliver(packet);
            done += 1;
        }

        let missing = self.missing();
        if missing >= self.refill.threshold {
            self.refill(missing)?;
        }
        Ok(done)
    }

    fn take_packet(&mut self, completed: &RxCompletedPacket) -> Result<RxPacket> {
        self.sq.release(completed.descs)?;

        let mut segments = SmallVec::with_capacity(completed.bufs.len());
        for (i, info) in completed.bufs.iter().enumerate() {
            let buffer = self.rx_info[info.req_id as usize].take().ok_or(
                QueueError::RequestIdNotOutstanding {
                    dir: Direction::Rx,
                    req_id: info.req_id,
                },
            )?;
            self.free_ids.push(info.req_id);
            segments.push(RxSegment {
                buffer,
                offset: if i == 0 { completed.pkt_offset as u16 } else { 0 },
                len: info.len,
            });
        }

        Ok(RxPacket {
            segments,
            meta: completed.meta,
        })
    }

    fn escalate(&mut self, error: QueueError) -> QueueError {
        self.stats.record_error(&error);
        if error.category() != ErrorCategory::Backpressure {
            CounterMetric::rx_dropped(&error).emit();
        }
        if let Some(reason) = error.reset_reason() {
            self.fault.trigger(reason);
        }
        error
    }

    /// Release every posted buffer and the buffer cache. Returns the number
    /// of buffers taken back from the device.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn teardown(&mut self) -> usize {
        let mut released = 0;
        for (req_id, slot) in self.rx_info.iter_mut().enumerate() {
            if slot.take().is_some() {
                self.free_ids.push(req_id as u16);
                released += 1;
            }
        }
        self.lpc.teardown();
        released
    }
}

#[cfg(test)]
mod tests {
    use nicq_common::desc::{RxCompletion, RxStatus};
    use nicq_testing::{CqWriter, FakeAllocator, FakeMem, RecordingDoorbell, SqView};

    use super::*;
    use crate::cq::CompletionKind;
    use crate::error::ResetReason;

    struct Fixture {
        queue: RxQueue<FakeMem, RecordingDoorbell>,
        device: CqWriter,
        view: SqView,
        doorbell: RecordingDoorbell,
        allocator: Arc<FakeAllocator>,
        fault: Arc<DeviceFault>,
    }

    fn fixture(depth: u16, lpc_capacity: usize, threshold: u16) -> Fixture {
        let mem = FakeMem::new(1 << 16);
        let sq_base = mem.carve(SubmissionQueue::<FakeMem, RecordingDoorbell>::required_size(depth, None));
        let cq_base = mem.carve(CompletionQueue::<FakeMem>::required_size(depth, CompletionKind::Rx));
        let doorbell = RecordingDoorbell::new();
        let allocator = Arc::new(FakeAllocator::new());
        let fault = DeviceFault::new();

        let sq = SubmissionQueue::new(mem.clone(), sq_base, depth, doorbell.clone(), 0).unwrap();
        let cq = CompletionQueue::new(mem.clone(), cq_base, depth, CompletionKind::Rx).unwrap();
        let queue = RxQueue::new(
            1,
            sq,
            cq,
            RxEngine::new(16, depth, false),
            LocalBufferCache::with_capacity(allocator.clone(), lpc_capacity, 2048),
            RxRefill {
                node: NumaNode(0),
                buf_len: 2048,
                threshold,
            },
            fault.clone(),
        );

        Fixture {
            queue,
            device: CqWriter::new(mem.clone(), cq_base, depth, CompletionKind::Rx.entry_size()),
            view: SqView::new(mem, sq_base, depth, RxDesc::SIZE),
            doorbell,
            allocator,
            fault,
        }
    }

    #[test]
    fn fill_keeps_one_slot_free() {
        let mut f = fixture(8, 0, 1);
        assert_eq!(f.queue.fill().unwrap(), 7);
        assert_eq!(f.queue.posted(), 7);
        assert_eq!(f.doorbell.writes(), vec![7]);

        let desc: RxDesc = f.view.entry(3);
        assert_eq!(desc.req_id(), 3);
        assert_eq!(desc.length(), 2048);
        assert_eq!(f.queue.fill().unwrap(), 0);
        assert_eq!(f.doorbell.count(), 1);
    }

    #[test]
    fn multi_buffer_packet_is_delivered_in_order() {
        let mut f = fixture(8, 0, 8);
        f.queue.fill().unwrap();
        let addr5 = f.view.entry::<RxDesc>(5).buffer_addr();
        let addr6 = f.view.entry::<RxDesc>(6).buffer_addr();

        f.device.post_rx(RxCompletion::new(RxStatus::FIRST, 2048, 5).with_offset(2));
        f.device.post_rx(RxCompletion::new(RxStatus::LAST, 100, 6).with_hash(7));

        let mut delivered = Vec::new();
        assert_eq!(f.queue.poll(64, &mut |p: RxPacket| delivered.push(p)).unwrap(), 1);

        let pkt = &delivered[0];
        assert_eq!(pkt.segments.len(), 2);
        assert_eq!(pkt.segments[0].buffer.device_addr(), addr5);
        assert_eq!(pkt.segments[0].offset, 2);
        assert_eq!(pkt.segments[1].buffer.device_addr(), addr6);
        assert_eq!(pkt.segments[1].offset, 0);
        assert_eq!(pkt.len(), 2148);
        assert_eq!(pkt.meta.hash, 7);
        assert_eq!(f.queue.posted(), 5);
        assert_eq!(f.queue.stats().packets, 1);
    }

    #[test]
    fn refill_waits_for_threshold() {
        let mut f = fixture(8, 0, 2);
        f.queue.fill().unwrap();

        f.device.post_rx(RxCompletion::new(RxStatus::FIRST | RxStatus::LAST, 64, 0));
        f.queue.poll(64, &mut |_: RxPacket| {}).unwrap();
        assert_eq!(f.queue.posted(), 6);

        f.device.post_rx(RxCompletion::new(RxStatus::FIRST | RxStatus::LAST, 64, 1));
        f.queue.poll(64, &mut |_: RxPacket| {}).unwrap();
        assert_eq!(f.queue.posted(), 7);
        assert_eq!(f.queue.stats().refilled, 9);
    }

    #[test]
    fn allocation_failure_is_not_fatal() {
        let mut f = fixture(8, 0, 1);
        f.allocator.fail_allocations(true);
        assert_eq!(f.queue.fill().unwrap(), 0);
        assert_eq!(f.queue.stats().alloc_fail, 1);
        assert!(!f.fault.is_set());
        assert_eq!(f.doorbell.count(), 0);

        f.allocator.fail_allocations(false);
        assert_eq!(f.queue.fill().unwrap(), 7);
    }

    #[test]
    fn completion_for_an_unposted_buffer_is_fatal() {
        let mut f = fixture(8, 0, 8);
        f.queue.refill(2).unwrap();
        f.device.post_rx(RxCompletion::new(RxStatus::FIRST | RxStatus::LAST, 64, 4));

        let err = f.queue.poll(64, &mut |_: RxPacket| {}).unwrap_err();
        assert!(matches!(
            err,
            QueueError::RequestIdNotOutstanding {
                dir: Direction::Rx,
                req_id: 4
            }
        ));
        assert_eq!(f.fault.reason(), Some(ResetReason::InvalidRxReqId));
    }

    #[test]
    fn set_fault_stops_polling_before_ring_access() {
        let mut f = fixture(8, 0, 8);
        f.queue.fill().unwrap();
        f.device.post_rx(RxCompletion::new(RxStatus::FIRST | RxStatus::LAST, 64, 0));
        f.fault.trigger(ResetReason::InvalidTxReqId);

        let err = f.queue.poll(64, &mut |_: RxPacket| {}).unwrap_err();
        assert!(matches!(
            err,
            QueueError::DeviceNeedsReset(ResetReason::InvalidTxReqId)
        ));
        assert_eq!(f.queue.cq().head(), 0);
    }

    #[test]
    fn set_fault_stops_refills() {
        let mut f = fixture(8, 0, 1);
        f.queue.refill(2).unwrap();
        f.fault.trigger(ResetReason::InvalidRxReqId);

        let err = f.queue.fill().unwrap_err();
        assert!(matches!(
            err,
            QueueError::DeviceNeedsReset(ResetReason::InvalidRxReqId)
        ));
        assert_eq!(f.queue.posted(), 2);
        assert_eq!(f.doorbell.writes(), vec![2]);
        assert_eq!(f.allocator.allocs(), 2);
    }

    #[test]
    fn partial_packet_is_counted() {
        let mut f = fixture(8, 0, 8);
        f.queue.fill().unwrap();
        f.device.post_rx(RxCompletion::new(RxStatus::FIRST, 2048, 0));

        assert_eq!(f.queue.poll(64, &mut |_: RxPacket| {}).unwrap(), 0);
        assert_eq!(f.queue.stats().partial, 1);
        assert_eq!(f.queue.cq().partial().count, 1);
    }

    #[test]
    fn delivered_buffers_return_to_the_cache() {
        let mut f = fixture(4, 4, 1);
        f.queue.fill().unwrap();
        assert_eq!(f.allocator.allocs(), 3);

        f.device.post_rx(RxCompletion::new(RxStatus::FIRST | RxStatus::LAST, 64, 0));
        f.queue.poll(64, &mut |p: RxPacket| drop(p)).unwrap();

        // The sink dropped the packet, so the refill reuses its buffer.
        assert_eq!(f.allocator.allocs(), 3);
        assert_eq!(f.queue.lpc_stats().reused, 1);
        assert_eq!(f.queue.posted(), 3);
    }

    #[test]
    fn teardown_releases_everything() {
        let mut f = fixture(8, 4, 8);
        f.queue.fill().unwrap();
        assert_eq!(f.queue.teardown(), 7);
        assert_eq!(f.allocator.live(), 0);
        assert_eq!(f.allocator.double_frees(), 0);
    }
}
