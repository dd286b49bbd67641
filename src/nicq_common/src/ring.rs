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

//! Phase-Bit Descriptor Ring
//!
//! A ring is a power-of-two array of equally sized slots shared with the
//! device. Software and device never exchange locks; they agree on slot
//! ownership through two free-running 16-bit counters and a phase bit.
//!
//! # Counters
//!
//! `tail` counts slots handed out to the producer, `head` counts slots
//! consumed (completion queues) or reclaimed (submission queues). The slot
//! index is `counter & (depth - 1)`, and because `depth` divides 2^16 the
//! counters may wrap freely: `tail - head` (wrapping) is always the number
//! of slots in flight.
//!
//! # Phase
//!
//! The producer stamps every entry with its current phase, which starts at
//! 1 and flips each time its counter crosses index 0. The consumer expects
//! phase 1 on its first lap, 0 on its second and so on:
//!
//! ```text
//!   lap 0 (phase 1)           lap 1 (phase 0)
//!   ┌───┬───┬───┬───┐         ┌───┬───┬───┬───┐
//!   │ 1 │ 1 │ 1 │ 1 │  wrap   │ 0 │ 0 │ 1 │ 1 │
//!   └───┴───┴───┴───┘  ────>  └───┴───┴───┴───┘
//!                                     ^ head: stale entry from lap 0,
//!                                       phase mismatch means "not ready"
//! ```
//!
//! An entry is new iff its stored phase matches the consumer's expected
//! phase, so memory never needs to be cleared between laps.
//!
//! # Ordering
//!
//! The ring itself issues no fences besides the acquire load of the phase
//! word and the [`dma_rmb`](crate::barrier::dma_rmb) that follows a match.
//! Producers must call [`dma_wmb`](crate::barrier::dma_wmb) before making
//! new entries visible through a doorbell.

use bytemuck::Pod;
use thiserror::Error;

use crate::access::DeviceMem;
use crate::barrier;
use crate::desc::{PHASE_BIT, PhaseEntry};

/// Largest ring the 16-bit counters can describe unambiguously.
pub const MAX_DEPTH: u16 = 1 << 15;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring is full")]
    Full,
    #[error("Invalid memory layout")]
    InvalidLayout,
    #[error("Invalid state")]
    InvalidState,
    #[error("Backend memory error")]
    MemError,
}

/// A slot handed to the producer by [`DescriptorRing::next_submit_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitSlot {
    /// Slot index within the ring.
    pub index: u16,
    /// Address of the slot in ring memory.
    pub addr: u64,
    /// Phase the entry written to this slot must carry.
    pub phase: bool,
}

#[derive(Debug)]
pub struct DescriptorRing<M> {
    mem: M,
    base: u64,
    depth: u16,
    mask: u16,
    slot_size: usize,
    head: u16,
    tail: u16,
    submit_phase: bool,
    complete_phase: bool,
}

impl<M: DeviceMem> DescriptorRing<M> {
    /// Bytes of ring memory needed for `depth` slots of `slot_size` bytes.
    pub const fn required_size(depth: u16, slot_size: usize) -> usize {
        depth as usize * slot_size
    }

    /// Create a ring over `depth` slots starting at `base`.
    ///
    /// `depth` must be a power of two no larger than [`MAX_DEPTH`], and
    /// both `base` and `slot_size` must be 8-byte aligned.
    pub fn new(mem: M, base: u64, depth: u16, slot_size: usize) -> Result<Self, RingError> {
        if depth == 0 || !depth.is_power_of_two() || depth > MAX_DEPTH {
            log::error!("ring depth {depth} is not a power of two in 1..={MAX_DEPTH}");
            return Err(RingError::InvalidLayout);
        }

        if slot_size == 0 || slot_size % 8 != 0 || base % 8 != 0 {
            log::error!("ring at {base:#x} with {slot_size} byte slots is misaligned");
            return Err(RingError::InvalidLayout);
        }

        Ok(Self {
            mem,
            base,
            depth,
            mask: depth - 1,
            slot_size,
            head: 0,
            tail: 0,
            submit_phase: true,
            complete_phase: true,
        })
    }

    #[inline]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    #[inline]
    pub fn mask(&self) -> u16 {
        self.mask
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    pub fn head(&self) -> u16 {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }

    /// Phase the producer stamps on the next entry.
    #[inline]
    pub fn submit_phase(&self) -> bool {
        self.submit_phase
    }

    /// Phase the consumer expects on the next new entry.
    #[inline]
    pub fn complete_phase(&self) -> bool {
        self.complete_phase
    }

    #[inline]
    pub fn mem(&self) -> &M {
        &self.mem
    }

    /// Slots handed out and not yet reclaimed.
    #[inline]
    pub fn used(&self) -> u16 {
        self.tail.wrapping_sub(self.head)
    }

    #[inline]
    pub fn free(&self) -> u16 {
        self.depth.saturating_sub(self.used())
    }

    #[inline]
    pub fn slot_addr(&self, counter: u16) -> u64 {
        self.base + (counter & self.mask) as u64 * self.slot_size as u64
    }

    /// Claim the slot at `tail`, advance `tail` and flip the producer phase
    /// when it wraps to index 0.
    pub fn next_submit_slot(&mut self) -> Result<SubmitSlot, RingError> {
        if self.used() >= self.depth {
            return Err(RingError::Full);
        }

        let slot = SubmitSlot {
            index: self.tail & self.mask,
            addr: self.slot_addr(self.tail),
            phase: self.submit_phase,
        };

        self.tail = self.tail.wrapping_add(1);
        if self.tail & self.mask == 0 {
            self.submit_phase = !self.submit_phase;
        }

        Ok(slot)
    }

    /// Write `entry` into `slot` stamped with the slot's phase.
    ///
    /// The first word, which holds the phase, is stored last with release
    /// semantics so a consumer never sees a matching phase before the rest
    /// of the entry.
    pub fn publish<T: PhaseEntry>(&self, slot: &SubmitSlot, mut entry: T) -> Result<(), RingError> {
        if core::mem::size_of::<T>() > self.slot_size {
            return Err(RingError::InvalidLayout);
        }

        entry.set_phase(slot.phase);
        let bytes = bytemuck::bytes_of(&entry);

        self.mem
            .write(slot.addr + 4, &bytes[4..])
            .map_err(|_| RingError::MemError)?;
        let word0: u32 = bytemuck::pod_read_unaligned(&bytes[..4]);
        self.mem
            .store_release(slot.addr, word0)
            .map_err(|_| RingError::MemError)
    }

    /// Return the entry at `head` if the device has written it this lap.
    ///
    /// Has no side effect: a mismatching phase means the device may still be
    /// writing the slot, so nothing past it is read.
    pub fn peek_next_complete<C: Pod>(&self) -> Result<Option<C>, RingError> {
        if core::mem::size_of::<C>() > self.slot_size {
            return Err(RingError::InvalidLayout);
        }

        let addr = self.slot_addr(self.head);
        let word = self
            .mem
            .load_acquire(addr)
            .map_err(|_| RingError::MemError)?;

        if (u32::from_le(word) & PHASE_BIT != 0) != self.complete_phase {
            return Ok(None);
        }

        // The rest of the entry may have landed after the phase word.
        barrier::dma_rmb();

        let entry = self
            .mem
            .read_val::<C>(addr)
            .map_err(|_| RingError::MemError)?;
        Ok(Some(entry))
    }

    /// Read the entry at `counter` without checking its phase.
    ///
    /// Used to revisit entries already consumed in this lap.
    pub fn read_at<C: Pod>(&self, counter: u16) -> Result<C, RingError> {
        if core::mem::size_of::<C>() > self.slot_size {
            return Err(RingError::InvalidLayout);
        }

        self.mem
            .read_val::<C>(self.slot_addr(counter))
            .map_err(|_| RingError::MemError)
    }

    /// Advance `head` by `n`, flipping the expected phase once per wrap.
    pub fn advance_head(&mut self, n: u16) {
        let wraps = ((self.head & self.mask) as u32 + n as u32) / self.depth as u32;
        if wraps % 2 == 1 {
            self.complete_phase = !self.complete_phase;
        }
        self.head = self.head.wrapping_add(n);
    }

    /// Reclaim `n` submitted slots.
    pub fn release(&mut self, n: u16) -> Result<(), RingError> {
        if n > self.used() {
            log::error!(
                "releasing {n} slots with only {} outstanding (head {}, tail {})",
                self.used(),
                self.head,
                self.tail
            );
            return Err(RingError::InvalidState);
        }

        self.advance_head(n);
        Ok(())
    }
}


#[cfg(test)]
mod fuzz {
    use std::collections::VecDeque;

    use quickcheck::{Arbitrary, Gen, QuickCheck};

    use super::tests::make_ring;
    use super::*;
    use crate::desc::{TxCtrl, TxDesc};

    const MAX_OPS: usize = 128;

    #[derive(Clone, Debug)]
    enum Op {
        /// producer submits up to N entries
        Submit(u8),
        /// consumer takes up to N entries
        Complete(u8),
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            match u8::arbitrary(g) % 2 {
                0 => Op::Submit(u8::arbitrary(g) % 12 + 1),
                _ => Op::Complete(u8::arbitrary(g) % 12 + 1),
            }
        }
    }

    #[derive(Clone, Debug)]
    struct Scenario {
        depth_log2: u8,
        ops: Vec<Op>,
    }

    impl Arbitrary for Scenario {
        fn arbitrary(g: &mut Gen) -> Self {
            let depth_log2 = u8::arbitrary(g) % 7;
            let num_ops = usize::arbitrary(g) % MAX_OPS + 1;
            let ops = (0..num_ops).map(|_| Op::arbitrary(g)).collect();
            Scenario { depth_log2, ops }
        }
    }

    fn run_scenario(scenario: Scenario) -> bool {
        let depth = 1u16 << scenario.depth_log2;
        let mut ring = make_ring(depth, TxDesc::SIZE);
        let mut in_flight = VecDeque::new();
        let mut next_id = 0u16;

        for op in scenario.ops {
            match op {
                Op::Submit(n) => {
                    for _ in 0..n {
                        match ring.next_submit_slot() {
                            Ok(slot) => {
                                let desc = TxDesc::new(TxCtrl::LAST, 0, next_id);
                                if ring.publish(&slot, desc).is_err() {
                                    return false;
                                }
                                in_flight.push_back(next_id);
                                next_id = next_id.wrapping_add(1);
                            }
                            Err(RingError::Full) => {
                                if in_flight.len() != depth as usize {
                                    return false;
                                }
                                break;
                            }
                            Err(_) => return false,
                        }
                    }
                }
                Op::Complete(n) => {
                    for _ in 0..n {
                        match ring.peek_next_complete::<TxDesc>() {
                            Ok(Some(desc)) => {
                                if in_flight.pop_front() != Some(desc.req_id()) {
                                    return false;
                                }
                                ring.advance_head(1);
                            }
                            Ok(None) => {
                                if !in_flight.is_empty() {
                                    return false;
                                }
                                break;
                            }
                            Err(_) => return false,
                        }
                    }
                }
            }

            if ring.used() as usize != in_flight.len() || ring.used() > depth {
                return false;
            }
            if ring.submit_phase() != ((ring.tail() / depth) % 2 == 0) {
                return false;
            }
            if ring.complete_phase() != ((ring.head() / depth) % 2 == 0) {
                return false;
            }
        }

        true
    }

    #[test]
    fn prop_ring_preserves_fifo_and_phase() {
        #[cfg(miri)]
        let tests = 1;
        #[cfg(not(miri))]
        let tests = 200;

        QuickCheck::new()
            .tests(tests)
            .quickcheck(run_scenario as fn(Scenario) -> bool);
    }
}
