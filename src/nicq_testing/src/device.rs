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

//! Device side of the rings.
//!
//! [`CqWriter`] plays the device posting completions with correct phase
//! bits; [`SqView`] reads back what the driver submitted.

use bytemuck::Pod;
use nicq_common::DeviceMem;
use nicq_common::desc::{PhaseEntry, RxCompletion, RxCompletionExt, TxCompletion};

use crate::mem::FakeMem;

/// Posts completions into a completion ring the way the device does.
pub struct CqWriter {
    mem: FakeMem,
    base: u64,
    depth: u16,
    entry_size: usize,
    tail: u16,
    phase: bool,
}

impl CqWriter {
    pub fn new(mem: FakeMem, base: u64, depth: u16, entry_size: usize) -> Self {
        assert!(depth.is_power_of_two());
        Self {
            mem,
            base,
            depth,
            entry_size,
            tail: 0,
            phase: true,
        }
    }

    /// Number of entries posted so far.
    pub fn tail(&self) -> u16 {
        self.tail
    }

    pub fn phase(&self) -> bool {
        self.phase
    }

    /// Write `entry` at the next slot with the device's current phase.
    ///
    /// Everything but the first word lands before the phase word.
    pub fn post<T: PhaseEntry>(&mut self, mut entry: T) {
        assert!(core::mem::size_of::<T>() <= self.entry_size);
        let addr = self.base + (self.tail & (self.depth - 1)) as u64 * self.entry_size as u64;

        entry.set_phase(self.phase);
        let bytes = bytemuck::bytes_of(&entry);
        self.mem.write(addr + 4, &bytes[4..]).unwrap();
        self.mem.write(addr, &bytes[..4]).unwrap();

        self.tail = self.tail.wrapping_add(1);
        if self.tail & (self.depth - 1) == 0 {
            self.phase = !self.phase;
        }
    }

    /// Write `entry` at the next slot with the wrong phase and without
    /// advancing, like a slot the device has not reached yet.
    pub fn post_stale<T: PhaseEntry>(&mut self, mut entry: T) {
        let addr = self.base + (self.tail & (self.depth - 1)) as u64 * self.entry_size as u64;
        entry.set_phase(!self.phase);
        self.mem.write(addr, bytemuck::bytes_of(&entry)).unwrap();
    }

    pub fn post_tx(&mut self, req_id: u16) {
        self.post(TxCompletion::new(req_id));
    }

    pub fn post_rx(&mut self, cdesc: RxCompletion) {
        self.post(cdesc);
    }

    pub fn post_rx_ext(&mut self, cdesc: RxCompletion, timestamp: u64) {
        self.post(RxCompletionExt::new(cdesc, timestamp));
    }
}

/// Read-only view of a submission ring.
pub struct SqView {
    mem: FakeMem,
    base: u64,
    depth: u16,
    slot_size: usize,
}

impl SqView {
    pub fn new(mem: FakeMem, base: u64, depth: u16, slot_size: usize) -> Self {
        Self {
            mem,
            base,
            depth,
            slot_size,
        }
    }

    fn slot_addr(&self, counter: u16) -> u64 {
        self.base + (counter & (self.depth - 1)) as u64 * self.slot_size as u64
    }

    /// Entry in host placement, one descriptor per slot.
    pub fn entry<T: Pod>(&self, counter: u16) -> T {
        self.mem.read_val(self.slot_addr(counter)).unwrap()
    }

    /// Raw bytes of a push-mode line.
    pub fn line(&self, counter: u16) -> Vec<u8> {
        self.mem.read_bytes(self.slot_addr(counter), self.slot_size)
    }

    /// Descriptor `index` within push-mode line `counter`.
    pub fn line_entry<T: Pod>(&self, counter: u16, index: usize) -> T {
        let size = core::mem::size_of::<T>();
        let line = self.line(counter);
        bytemuck::pod_read_unaligned(&line[index * size..(index + 1) * size])
    }
}
