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
#![allow(dead_code)]

use std::sync::Arc;

use nicq_common::desc::{TxDesc, TxMeta};
use nicq_common::{DeviceCaps, NumaNode};
use nicq_driver::{
    DeviceFault, Placement, QueueConfig, QueuePair, QueueResources, RingMemory, RxPacket, Segment,
    TxPacket,
};
use nicq_testing::{CqWriter, FakeAllocator, FakeMapper, FakeMem, RecordingDoorbell, SqView};

/// An outgoing test packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: u32,
    pub header: Vec<u8>,
    pub payload: Vec<Segment>,
    pub meta: Option<TxMeta>,
}

impl Frame {
    /// A frame with `segments` payload pieces of 1000 bytes each.
    pub fn new(id: u32, segments: usize) -> Self {
        Self {
            id,
            header: Vec::new(),
            payload: (0..segments)
                .map(|i| Segment {
                    addr: 0x4000_0000 + id as u64 * 0x10_0000 + i as u64 * 0x1000,
                    len: 1000,
                })
                .collect(),
            meta: None,
        }
    }

    pub fn with_header(mut self, len: usize) -> Self {
        self.header = (0..len).map(|i| i as u8).collect();
        self
    }

    pub fn with_meta(mut self, meta: TxMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl TxPacket for Frame {
    fn header(&self) -> &[u8] {
        &self.header
    }

    fn header_addr(&self) -> u64 {
        0x3000_0000 + self.id as u64 * 0x1000
    }

    fn payload(&self) -> &[Segment] {
        &self.payload
    }

    fn meta(&self) -> Option<TxMeta> {
        self.meta
    }
}

/// A queue pair with the device side played by the test.
pub struct Harness {
    pub qp: QueuePair<FakeMem, RecordingDoorbell, Frame>,
    pub tx_device: CqWriter,
    pub rx_device: CqWriter,
    pub tx_view: SqView,
    pub rx_view: SqView,
    pub tx_doorbell: RecordingDoorbell,
    pub rx_doorbell: RecordingDoorbell,
    pub mapper: Arc<FakeMapper>,
    pub allocator: Arc<FakeAllocator>,
    pub fault: Arc<DeviceFault>,
}

pub fn small_config() -> QueueConfig {
    let mut config = QueueConfig::default();
    config.set_tx_depth(16);
    config.set_rx_depth(16);
    config
}

pub fn harness(config: &QueueConfig, caps: DeviceCaps, fault: Arc<DeviceFault>) -> Harness {
    let sizes = QueuePair::<FakeMem, RecordingDoorbell, Frame>::ring_sizes(config, caps);
    let mem = FakeMem::new(sizes.tx_sq + sizes.tx_cq + sizes.rx_sq + sizes.rx_cq + 4096);
    let ring = |size| RingMemory {
        mem: mem.clone(),
        base: mem.carve(size),
    };
    let (tx_sq, tx_cq, rx_sq, rx_cq) = (
        ring(sizes.tx_sq),
        ring(sizes.tx_cq),
        ring(sizes.rx_sq),
        ring(sizes.rx_cq),
    );
    let (tx_sq_base, tx_cq_base, rx_sq_base, rx_cq_base) =
        (tx_sq.base, tx_cq.base, rx_sq.base, rx_cq.base);

    let tx_doorbell = RecordingDoorbell::new();
    let rx_doorbell = RecordingDoorbell::new();
    let mapper = Arc::new(FakeMapper::new());
    let allocator = Arc::new(FakeAllocator::new());

    let qp = QueuePair::new(
        0,
        config,
        caps,
        QueueResources {
            tx_sq,
            tx_cq,
            rx_sq,
            rx_cq,
            tx_doorbell: tx_doorbell.clone(),
            rx_doorbell: rx_doorbell.clone(),
            mapper: mapper.clone(),
            allocator: allocator.clone(),
            node: NumaNode(0),
            queue_count: 32,
            hook_attached: false,
        },
        fault.clone(),
    )
    .unwrap();

    let tx_slot = match qp.tx().sq().placement() {
        Placement::Host => TxDesc::SIZE,
        Placement::Device => config.llq().line_size() as usize,
    };
    let rx_cq_entry = qp.rx().cq().kind().entry_size();

    Harness {
        tx_device: CqWriter::new(mem.clone(), tx_cq_base, config.tx_depth(), 8),
        rx_device: CqWriter::new(mem.clone(), rx_cq_base, config.rx_depth(), rx_cq_entry),
        tx_view: SqView::new(mem.clone(), tx_sq_base, config.tx_depth(), tx_slot),
        rx_view: SqView::new(mem, rx_sq_base, config.rx_depth(), 16),
        qp,
        tx_doorbell,
        rx_doorbell,
        mapper,
        allocator,
        fault,
    }
}

impl Harness {
    /// Poll once, collecting what was sent and received.
    pub fn poll(&mut self) -> nicq_driver::Result<(Vec<Frame>, Vec<RxPacket>)> {
        let mut sent = Vec::new();
        let mut received = Vec::new();
        self.qp.poll(
            64,
            &mut |frame: Frame| sent.push(frame),
            &mut |packet: RxPacket| received.push(packet),
        )?;
        Ok((sent, received))
    }
}
