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

use nicq_common::{BufferAllocator, DeviceCaps, DeviceMem, DmaMapper, Doorbell, NumaNode};
use tracing::{Span, info, instrument, warn};

use crate::config::{Placement, QueueConfig};
use crate::cq::{CompletionKind, CompletionQueue};
use crate::error::Result;
use crate::fault::DeviceFault;
use crate::lpc::LocalBufferCache;
use crate::rx::{RxEngine, RxQueue, RxRefill, RxSink};
use crate::sq::SubmissionQueue;
use crate::tx::{Rejected, TxEngine, TxPacket, TxQueue, TxSink};

/// Memory a ring lives in.
#[derive(Clone, Debug)]
pub struct RingMemory<M> {
    pub mem: M,
    pub base: u64,
}

/// Bytes each ring of a queue pair needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingSizes {
    pub tx_sq: usize,
    pub tx_cq: usize,
    pub rx_sq: usize,
    pub rx_cq: usize,
}

/// Everything a queue pair borrows from the device and the platform.
pub struct QueueResources<M, D> {
    pub tx_sq: RingMemory<M>,
    pub tx_cq: RingMemory<M>,
    pub rx_sq: RingMemory<M>,
    pub rx_cq: RingMemory<M>,
    pub tx_doorbell: D,
    pub rx_doorbell: D,
    pub mapper: Arc<dyn DmaMapper>,
    pub allocator: Arc<dyn BufferAllocator>,
    /// NUMA node of the worker that polls the pair.
    pub node: NumaNode,
    /// Number of queue pairs on the device.
    pub queue_count: u16,
    /// Whether a packet processing hook owns the receive path.
    pub hook_attached: bool,
}

/// Work done by one [`QueuePair::poll`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub tx_completed: usize,
    pub rx_delivered: usize,
}

/// A transmit and a receive queue polled by one worker.
pub struct QueuePair<M, D, P> {
    qid: u16,
    tx: TxQueue<M, D, P>,
    rx: RxQueue<M, D>,
    fault: Arc<DeviceFault>,
    queue_count: u16,
    hook_attached: bool,
}

/// TX placement actually used on a device with `caps`.
pub fn effective_placement(config: &QueueConfig, caps: DeviceCaps) -> Placement {
    match config.placement() {
        Placement::Device if !caps.contains(DeviceCaps::LLQ) => {
            warn!("device memory placement requested but unsupported, using host placement");
            Placement::Host
        }
        placement => placement,
    }
}

fn rx_completion_kind(caps: DeviceCaps) -> CompletionKind {
    if caps.contains(DeviceCaps::EXTENDED_RX_CDESC) {
        CompletionKind::RxExtended
    } else {
        CompletionKind::Rx
    }
}

impl<M: DeviceMem + Clone, D: Doorbell, P: TxPacket> QueuePair<M, D, P> {
    pub fn ring_sizes(config: &QueueConfig, caps: DeviceCaps) -> RingSizes {
        let llq = match effective_placement(config, caps) {
            Placement::Host => None,
            Placement::Device => Some(config.llq()),
        };
        RingSizes {
            tx_sq: SubmissionQueue::<M, D>::required_size(config.tx_depth(), llq),
            tx_cq: CompletionQueue::<M>::required_size(config.tx_depth(), CompletionKind::Tx),
            rx_sq: SubmissionQueue::<M, D>::required_size(config.rx_depth(), None),
            rx_cq: CompletionQueue::<M>::required_size(config.rx_depth(), rx_completion_kind(caps)),
        }
    }

    /// Build both queues and post the initial receive buffers.
    ///
    /// Fails with `DeviceNeedsReset` while the device fault flag is set.
    #[instrument(err(Debug), skip(config, resources, fault), parent = Span::current(), level= "Trace")]
    pub fn new(
        qid: u16,
        config: &QueueConfig,
        caps: DeviceCaps,
        resources: QueueResources<M, D>,
        fault: Arc<DeviceFault>,
    ) -> Result<Self> {
        fault.check()?;

        let QueueResources {
            tx_sq,
            tx_cq,
            rx_sq,
            rx_cq,
            tx_doorbell,
            rx_doorbell,
            mapper,
            allocator,
            node,
            queue_count,
            hook_attached,
        } = resources;

        let sq = match effective_placement(config, caps) {
            Placement::Host => SubmissionQueue::new(
                tx_sq.mem,
                tx_sq.base,
                config.tx_depth(),
                tx_doorbell,
                config.max_tx_header_size(),
            )?,
            Placement::Device => {
                let max_burst = caps
                    .contains(DeviceCaps::LLQ_MAX_BURST)
                    .then_some(config.max_burst());
                SubmissionQueue::new_llq(
                    tx_sq.mem,
                    tx_sq.base,
                    config.tx_depth(),
                    tx_doorbell,
                    config.llq(),
                    config.max_tx_header_size(),
                    max_burst,
                )?
            }
        };
        let cq = CompletionQueue::new(tx_cq.mem, tx_cq.base, config.tx_depth(), CompletionKind::Tx)?;
        let meta_caching = config.meta_caching() && caps.contains(DeviceCaps::META_CACHING);
        let tx = TxQueue::new(
            qid,
            sq,
            cq,
            TxEngine::new(meta_caching, config.max_tx_sgl()),
            mapper,
            fault.clone(),
        );

        let rx_sq = SubmissionQueue::new(rx_sq.mem, rx_sq.base, config.rx_depth(), rx_doorbell, 0)?;
        let rx_cq = CompletionQueue::new(
            rx_cq.mem,
            rx_cq.base,
            config.rx_depth(),
            rx_completion_kind(caps),
        )?;
        let engine = RxEngine::new(
            config.max_rx_sgl(),
            config.rx_depth(),
            caps.contains(DeviceCaps::CDESC_MBZ),
        );

        let multiplier = if config.lpc_multiplier() > 0
            && LocalBufferCache::is_cache_supported(queue_count, hook_attached, false)
        {
            config.lpc_multiplier()
        } else {
            0
        };
        let lpc = LocalBufferCache::new(allocator, multiplier, config.rx_buf_size());

        let refill = RxRefill {
            node,
            buf_len: config.rx_buf_size() as u16,
            threshold: config.refill_threshold(),
        };
        let mut rx = RxQueue::new(qid, rx_sq, rx_cq, engine, lpc, refill, fault.clone());
        let posted = rx.fill()?;

        info!(
            qid,
            placement = ?tx.sq().placement(),
            meta_caching,
            lpc_slots = LocalBufferCache::capacity_for(multiplier),
            posted,
            "queue pair ready"
        );

        Ok(Self {
            qid,
            tx,
            rx,
            fault,
            queue_count,
            hook_attached,
        })
    }

    pub fn qid(&self) -> u16 {
        self.qid
    }

    pub fn tx(&self) -> &TxQueue<M, D, P> {
        &self.tx
    }

    pub fn rx(&self) -> &RxQueue<M, D> {
        &self.rx
    }

    pub fn fault(&self) -> &Arc<DeviceFault> {
        &self.fault
    }

    pub fn send(&mut self, packet: P) -> core::result::Result<(), Rejected<P>> {
        self.tx.send(packet)
    }

    pub fn notify_tx(&mut self) -> bool {
        self.tx.notify()
    }

    /// Reclaim sent packets, then deliver up to `budget` received packets.
    ///
    /// Fails with `DeviceNeedsReset` without touching any ring once the
    /// device fault flag is set. A fatal error on either queue sets the flag.
    pub fn poll<T: TxSink<P>, R: RxSink>(
        &mut self,
        budget: usize,
        tx_sink: &mut T,
        rx_sink: &mut R,
    ) -> Result<PollSummary> {
        self.fault.check()?;
        let tx_completed = self.tx.clean_completions(budget, tx_sink)?;
        let rx_delivered = self.rx.poll(budget, rx_sink)?;
        Ok(PollSummary {
            tx_completed,
            rx_delivered,
        })
    }

    /// Resize the receive buffer cache. Zero disables it.
    pub fn set_lpc_multiplier(&mut self, multiplier: u8) -> Result<()> {
        self.rx
            .lpc_mut()
            .set_multiplier(multiplier, self.queue_count, self.hook_attached)
    }

    /// Split into the two queues, e.g. to share the transmit queue.
    pub fn into_parts(self) -> (TxQueue<M, D, P>, RxQueue<M, D>) {
        (self.tx, self.rx)
    }

    /// Give back every packet and buffer the pair still holds.
    #[instrument(skip_all, fields(qid = self.qid), parent = Span::current(), level= "Trace")]
    pub fn teardown<T: TxSink<P>>(&mut self, tx_sink: &mut T) {
        let abandoned = self.tx.teardown(tx_sink);
        let released = self.rx.teardown();
        info!(qid = self.qid, abandoned, released, "queue pair torn down");
    }
}
