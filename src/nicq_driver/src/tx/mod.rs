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

//! Transmit queue: request id bookkeeping, DMA mapping and completion
//! reclamation around [`TxEngine`].

pub mod engine;

use std::sync::Arc;

pub use engine::{TxBuffer, TxContext, TxEngine, TxPrepared};
use fixedbitset::FixedBitSet;
use nicq_common::desc::TxMeta;
use nicq_common::{DeviceMem, DmaMapper, Doorbell};
use smallvec::SmallVec;
use tracing::{Span, debug, instrument};

use crate::config::Placement;
use crate::cq::CompletionQueue;
use crate::error::{Direction, ErrorCategory, QueueError, Result};
use crate::fault::DeviceFault;
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::sq::SubmissionQueue;
use crate::stats::TxStats;

/// A contiguous piece of packet memory at a host address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub addr: u64,
    pub len: u16,
}

/// An outgoing packet as the network stack hands it over.
pub trait TxPacket {
    /// Packet headers. Pushed inline in push placement, mapped like the
    /// payload in host placement.
    fn header(&self) -> &[u8];

    /// Host address of [`header`](Self::header).
    fn header_addr(&self) -> u64;

    /// Payload following the header.
    fn payload(&self) -> &[Segment];

    fn meta(&self) -> Option<TxMeta> {
        None
    }

    fn dont_fragment(&self) -> bool {
        false
    }
}

/// Receives packets the device is done with.
pub trait TxSink<P> {
    fn sent(&mut self, packet: P);
}

impl<P, F: FnMut(P)> TxSink<P> for F {
    fn sent(&mut self, packet: P) {
        self(packet)
    }
}

/// A packet the queue did not take, with the reason.
#[derive(Debug)]
pub struct Rejected<P> {
    pub packet: P,
    pub error: QueueError,
}

struct TxInfo<P> {
    packet: P,
    /// Device address and length of every mapping made for the packet.
    mappings: SmallVec<[(u64, u32); 4]>,
    slots: u16,
}

pub struct TxQueue<M, D, P> {
    qid: u16,
    sq: SubmissionQueue<M, D>,
    cq: CompletionQueue<M>,
    engine: TxEngine,
    tx_info: Vec<Option<TxInfo<P>>>,
    free_ids: Vec<u16>,
    outstanding: FixedBitSet,
    mapper: Arc<dyn DmaMapper>,
    fault: Arc<DeviceFault>,
    stats: TxStats,
}

impl<M: DeviceMem, D: Doorbell, P: TxPacket> TxQueue<M, D, P> {
    pub fn new(
        qid: u16,
        sq: SubmissionQueue<M, D>,
        cq: CompletionQueue<M>,
        engine: TxEngine,
        mapper: Arc<dyn DmaMapper>,
        fault: Arc<DeviceFault>,
    ) -> Self {
        let depth = cq.depth();
        Self {
            qid,
            sq,
            cq,
            engine,
            tx_info: (0..depth).map(|_| None).collect(),
            // Lowest ids are handed out first.
            free_ids: (0..depth).rev().collect(),
            outstanding: FixedBitSet::with_capacity(depth as usize),
            mapper,
            fault,
            stats: TxStats::default(),
        }
    }

    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    pub fn sq(&self) -> &SubmissionQueue<M, D> {
        &self.sq
    }

    pub fn engine(&self) -> &TxEngine {
        &self.engine
    }

    /// Packets handed to the device and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.outstanding.count_ones(..)
    }

    /// Queue `packet` for transmission. The doorbell is rung by
    /// [`notify`](Self::notify), or here when the push burst budget is
    /// exhausted.
    pub fn send(&mut self, packet: P) -> core::result::Result<(), Rejected<P>> {
        if let Err(error) = self.fault.check() {
            return Err(Rejected { packet, error });
        }

        let push = self.sq.placement() == Placement::Device;
        let header = packet.header();
        let mut pieces: SmallVec<[Segment; 8]> = SmallVec::new();
        if !push && !header.is_empty() {
            // In host placement the header is mapped like any other segment.
            let Ok(len) = u16::try_from(header.len()) else {
                let error = QueueError::HeaderTooLarge {
                    len: header.len(),
                    max: u16::MAX as usize,
                };
                return Err(self.reject(packet, error));
            };
            pieces.push(Segment {
                addr: packet.header_addr(),
                len,
            });
        }
        pieces.extend_from_slice(packet.payload());

        let Some(req_id) = self.free_ids.pop() else {
            return Err(self.reject(packet, QueueError::NoFreeRequestId(Direction::Tx)));
        };

        let mut mappings = SmallVec::new();
        let mut buffers: SmallVec<[TxBuffer; 8]> = SmallVec::new();

        for seg in &pieces {
            match self.mapper.map(seg.addr, seg.len as u32) {
                Ok(addr) => {
                    mappings.push((addr, seg.len as u32));
                    buffers.push(TxBuffer { addr, len: seg.len });
                }
                Err(e) => {
                    self.unmap_all(&mappings);
                    self.free_ids.push(req_id);
                    return Err(self.reject(packet, QueueError::DmaMapping(e)));
                }
            }
        }

        let ctx = TxContext {
            push_header: push.then_some(header),
            buffers: &buffers,
            req_id,
            meta: packet.meta(),
            df: packet.dont_fragment(),
        };

        if self.engine.is_doorbell_needed(&self.sq, &ctx) && self.sq.notify() {
            self.stats.doorbells += 1;
        }

        let prepared = match self.engine.prepare_tx(&mut self.sq, &ctx) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.unmap_all(&mappings);
                self.free_ids.push(req_id);
                return Err(self.reject(packet, e));
            }
        };

        let bytes = header.len() as u64
            + packet.payload().iter().map(|s| s.len as u64).sum::<u64>();
        self.stats.packets += 1;
        self.stats.bytes += bytes;
        if prepared.meta_emitted {
            self.stats.meta_descs += 1;
        } else if self.engine.meta_caching() {
            self.stats.meta_cache_hits += 1;
        }
        if push {
            self.stats.llq_lines += prepared.slots as u64;
        }

        self.outstanding.insert(req_id as usize);
        self.tx_info[req_id as usize] = Some(TxInfo {
            packet,
            mappings,
            slots: prepared.slots,
        });
        Ok(())
    }

    /// Ring the doorbell for everything sent since the last call. The
    /// doorbell stays silent once the device is faulted.
    pub fn notify(&mut self) -> bool {
        if self.fault.is_set() {
            return false;
        }

        let rang = self.sq.notify();
        if rang {
            self.stats.doorbells += 1;
        }
        rang
    }

    /// Reclaim up to `budget` completed packets, handing each to `sink`.
    pub fn clean_completions<S: TxSink<P>>(&mut self, budget: usize, sink: &mut S) -> Result<usize> {
        self.fault.check()?;

        let mut done = 0;
        while done < budget {
            let req_id = match self.cq.try_take_request_id() {
                Ok(Some(req_id)) => req_id,
                Ok(None) => break,
                Err(e) => return Err(self.escalate(e)),
            };

            let info = match self.take_info(req_id) {
                Ok(info) => info,
                Err(e) => return Err(self.escalate(e)),
            };

            self.unmap_all(&info.mappings);
            if let Err(e) = self.sq.release(info.slots) {
                return Err(self.escalate(e));
            }
            self.free_ids.push(req_id);
            self.stats.completed += 1;
            sink.sent(info.packet);
            done += 1;
        }
        Ok(done)
    }

    fn take_info(&mut self, req_id: u16) -> Result<TxInfo<P>> {
        let not_outstanding = QueueError::RequestIdNotOutstanding {
            dir: Direction::Tx,
            req_id,
        };
        if !self.outstanding.contains(req_id as usize) {
            return Err(not_outstanding);
        }
        self.outstanding.set(req_id as usize, false);
        self.tx_info[req_id as usize].take().ok_or(not_outstanding)
    }

    fn unmap_all(&self, mappings: &[(u64, u32)]) {
        for (addr, len) in mappings {
            self.mapper.unmap(*addr, *len);
        }
    }

    fn reject(&mut self, packet: P, error: QueueError) -> Rejected<P> {
        self.stats.record_error(&error);
        if error.category() != ErrorCategory::Backpressure {
            debug!(qid = self.qid, %error, "dropping TX packet");
            CounterMetric::tx_dropped(&error).emit();
        }
        if let Some(reason) = error.reset_reason() {
            self.fault.trigger(reason);
        }
        Rejected { packet, error }
    }

    fn escalate(&mut self, error: QueueError) -> QueueError {
        self.stats.record_error(&error);
        if let Some(reason) = error.reset_reason() {
            self.fault.trigger(reason);
        }
        error
    }

    /// Reclaim what the device already completed, then unmap and hand back
    /// every packet still in flight. Returns the number abandoned.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn teardown<S: TxSink<P>>(&mut self, sink: &mut S) -> usize {
        if !self.fault.is_set() {
            if let Err(e) = self.clean_completions(usize::MAX, sink) {
                debug!(qid = self.qid, error = %e, "stopped draining TX completions");
            }
        }

        let mut abandoned = 0;
        for slot in self.tx_info.iter_mut() {
            if let Some(info) = slot.take() {
                for (addr, len) in &info.mappings {
                    self.mapper.unmap(*addr, *len);
                }
                sink.sent(info.packet);
                abandoned += 1;
            }
        }
        self.outstanding.clear();
        abandoned
    }
}

/// A transmit queue several workers may send on, such as the queue used for
/// forwarded traffic.
pub struct SharedTxQueue<M, D, P> {
    inner: spin::Mutex<TxQueue<M, D, P>>,
}

impl<M: DeviceMem, D: Doorbell, P: TxPacket> SharedTxQueue<M, D, P> {
    pub fn new(queue: TxQueue<M, D, P>) -> Self {
        Self {
            inner: spin::Mutex::new(queue),
        }
    }

    /// Submit `packet` and ring the doorbell under the queue lock.
    pub fn send(&self, packet: P) -> core::result::Result<(), Rejected<P>> {
        let mut queue = self.inner.lock();
        queue.send(packet)?;
        queue.notify();
        Ok(())
    }

    pub fn clean_completions<S: TxSink<P>>(&self, budget: usize, sink: &mut S) -> Result<usize> {
        self.inner.lock().clean_completions(budget, sink)
    }

    pub fn stats(&self) -> TxStats {
        *self.inner.lock().stats()
    }

    pub fn into_inner(self) -> TxQueue<M, D, P> {
        self.inner.into_inner()
    }
}
