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

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nicq_common::NumaNode;
use nicq_common::desc::{RxCompletion, RxStatus, TxMeta};
use nicq_driver::{
    CompletionKind, CompletionQueue, LlqConfig, LocalBufferCache, RxEngine, RxOutcome,
    SubmissionQueue, TxBuffer, TxContext, TxEngine,
};
use nicq_testing::{CqWriter, FakeAllocator, FakeMem, RecordingDoorbell};

const DEPTH: u16 = 1024;

type Sq = SubmissionQueue<FakeMem, RecordingDoorbell>;

fn host_sq() -> Sq {
    let mem = FakeMem::new(1 << 20);
    let base = mem.carve(Sq::required_size(DEPTH, None));
    Sq::new(mem, base, DEPTH, RecordingDoorbell::new(), 96).unwrap()
}

fn llq_sq() -> Sq {
    let llq = LlqConfig::default();
    let mem = FakeMem::new(1 << 20);
    let base = mem.carve(Sq::required_size(DEPTH, Some(&llq)));
    Sq::new_llq(mem, base, DEPTH, RecordingDoorbell::new(), &llq, 96, None).unwrap()
}

fn prepare_tx_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare_tx");
    group.throughput(Throughput::Elements(1));

    let header = [0u8; 54];
    let buffers = [TxBuffer {
        addr: 0x8000_0000,
        len: 1400,
    }];

    for (name, mut sq, push) in [("host", host_sq(), false), ("llq", llq_sq(), true)] {
        for meta_caching in [false, true] {
            let mut engine = TxEngine::new(meta_caching, 17);
            let ctx = TxContext {
                push_header: push.then_some(&header[..]),
                buffers: &buffers,
                req_id: 0,
                meta: Some(TxMeta {
                    mss: 1448,
                    ..TxMeta::default()
                }),
                df: false,
            };

            let id = BenchmarkId::new(name, if meta_caching { "cached_meta" } else { "meta" });
            group.bench_function(id, |b| {
                b.iter(|| {
                    let prepared = engine.prepare_tx(&mut sq, black_box(&ctx)).unwrap();
                    sq.notify();
                    sq.release(prepared.slots).unwrap();
                })
            });
        }
    }

    group.finish();
}

fn receive_one_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_one");

    for descs in [1u16, 4] {
        let mem = FakeMem::new(1 << 20);
        let base = mem.carve(CompletionQueue::<FakeMem>::required_size(DEPTH, CompletionKind::Rx));
        let mut cq = CompletionQueue::new(mem.clone(), base, DEPTH, CompletionKind::Rx).unwrap();
        let mut device = CqWriter::new(mem, base, DEPTH, CompletionKind::Rx.entry_size());
        let engine = RxEngine::new(16, DEPTH, true);

        group.throughput(Throughput::Elements(descs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(descs), &descs, |b, &descs| {
            b.iter(|| {
                for i in 0..descs {
                    let mut flags = RxStatus::empty();
                    if i == 0 {
                        flags |= RxStatus::FIRST;
                    }
                    if i == descs - 1 {
                        flags |= RxStatus::LAST;
                    }
                    device.post_rx(RxCompletion::new(flags, 2048, i));
                }
                match engine.receive_one(&mut cq).unwrap() {
                    RxOutcome::Packet(pkt) => black_box(pkt),
                    other => panic!("unexpected {other:?}"),
                };
            })
        });
    }

    group.finish();
}

fn buffer_cache_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("lpc");

    group.bench_function("steady_reuse", |b| {
        let mut lpc = LocalBufferCache::new(Arc::new(FakeAllocator::new()), 1, 2048);
        b.iter(|| {
            let buf = lpc.get_buffer(NumaNode(0)).unwrap();
            black_box(buf.device_addr());
        })
    });

    group.bench_function("uncached", |b| {
        let mut lpc = LocalBufferCache::new(Arc::new(FakeAllocator::new()), 0, 2048);
        b.iter(|| {
            let buf = lpc.get_buffer(NumaNode(0)).unwrap();
            black_box(buf.device_addr());
        })
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets =
        prepare_tx_benchmark,
        receive_one_benchmark,
        buffer_cache_benchmark,
}
criterion_main!(benches);
