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

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use nicq_common::desc::TxCompletion;
use nicq_driver::{
    CompletionKind, CompletionQueue, DeviceFault, QueueError, Segment, SubmissionQueue, TxEngine,
    TxPacket, TxQueue,
};
use nicq_testing::{CqWriter, FakeMapper, FakeMem, RecordingDoorbell};

const DEPTH: u16 = 32;

struct Packet([Segment; 1]);

impl TxPacket for Packet {
    fn header(&self) -> &[u8] {
        &[]
    }

    fn header_addr(&self) -> u64 {
        0
    }

    fn payload(&self) -> &[Segment] {
        &self.0
    }
}

// Sends a few packets, then lets the device complete arbitrary request ids.
// Bogus ids must surface as fatal errors, never as panics or leaked mappings
// of packets that were reclaimed.
fuzz_target!(|data: (u8, Vec<TxCompletion>)| {
    let (sends, completions) = data;
    let mem = FakeMem::new(1 << 14);
    let sq_base = mem.carve(SubmissionQueue::<FakeMem, RecordingDoorbell>::required_size(DEPTH, None));
    let cq_base = mem.carve(CompletionQueue::<FakeMem>::required_size(DEPTH, CompletionKind::Tx));
    let mapper = Arc::new(FakeMapper::new());
    let fault = DeviceFault::new();

    let sq = SubmissionQueue::new(mem.clone(), sq_base, DEPTH, RecordingDoorbell::new(), 96).unwrap();
    let cq = CompletionQueue::new(mem.clone(), cq_base, DEPTH, CompletionKind::Tx).unwrap();
    let mut queue = TxQueue::new(0, sq, cq, TxEngine::new(true, 17), mapper.clone(), fault.clone());
    let mut device = CqWriter::new(mem, cq_base, DEPTH, CompletionKind::Tx.entry_size());

    for i in 0..(sends % DEPTH as u8) {
        let seg = Segment {
            addr: 0x1000 * (i as u64 + 1),
            len: 64,
        };
        if let Err(rejected) = queue.send(Packet([seg])) {
            assert!(matches!(rejected.error, QueueError::NotEnoughSpace { .. }));
        }
    }
    queue.notify();

    for cdesc in completions.into_iter().take(DEPTH as usize) {
        device.post(cdesc);
    }

    match queue.clean_completions(usize::MAX, &mut |_: Packet| {}) {
        Ok(_) => assert!(!fault.is_set()),
        Err(e) => {
            assert!(e.is_fatal());
            assert!(fault.is_set());
        }
    }
    assert_eq!(mapper.live(), queue.in_flight());
});
