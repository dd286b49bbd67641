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

use libfuzzer_sys::fuzz_target;
use nicq_common::desc::RxCompletion;
use nicq_driver::{CompletionKind, CompletionQueue, RxEngine, RxOutcome};
use nicq_testing::{CqWriter, FakeMem};

const DEPTH: u16 = 64;
const MAX_BUFS: u16 = 8;

// Whatever the device writes, the engine must never panic, never consume
// more than was written and only report packets within its limits.
fuzz_target!(|data: (bool, Vec<RxCompletion>)| {
    let (check_mbz, cdescs) = data;
    let mem = FakeMem::new(1 << 14);
    let base = mem.carve(CompletionQueue::<FakeMem>::required_size(DEPTH, CompletionKind::Rx));
    let mut cq = CompletionQueue::new(mem.clone(), base, DEPTH, CompletionKind::Rx).unwrap();
    let mut device = CqWriter::new(mem, base, DEPTH, CompletionKind::Rx.entry_size());
    let engine = RxEngine::new(MAX_BUFS, DEPTH, check_mbz);

    let mut posted: u32 = 0;
    let mut consumed: u32 = 0;
    for chunk in cdescs.chunks(DEPTH as usize / 2) {
        for cdesc in chunk {
            device.post_rx(*cdesc);
            posted += 1;
        }

        loop {
            match engine.receive_one(&mut cq) {
                Ok(RxOutcome::Packet(pkt)) => {
                    assert!(pkt.descs >= 1 && pkt.descs <= MAX_BUFS);
                    assert_eq!(pkt.bufs.len(), pkt.descs as usize);
                    assert!(pkt.bufs.iter().all(|b| b.req_id < DEPTH));
                    consumed += pkt.descs as u32;
                }
                Ok(RxOutcome::Empty) | Ok(RxOutcome::Pending { .. }) => break,
                Err(e) => {
                    assert!(e.is_fatal());
                    return;
                }
            }
        }
        assert_eq!(consumed + cq.partial().count as u32, posted);
        assert_eq!(cq.head(), device.tail());
    }
});
