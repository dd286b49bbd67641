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

//! Submission Queue
//!
//! A submission queue owns the producer side of a [`DescriptorRing`]. In
//! host placement each descriptor is published straight into its ring slot.
//! In push placement (LLQ) the ring lives in device memory and every slot
//! is one *line*: descriptors and the packet header are first assembled in
//! a host-side bounce line, and the whole line is then copied to the device
//! with 64-bit stores.
//!
//! ```text
//!  first line of a packet           continuation line
//!  ┌──────┬──────┬─────────────┐    ┌──────┬──────┬──────┬──────┐
//!  │ desc │ desc │ header ...  │    │ desc │ desc │ desc │ desc │ ...
//!  └──────┴──────┴─────────────┘    └──────┴──────┴──────┴──────┘
//!   descs_before_header              line_size / 16 descriptors
//! ```
//!
//! In push placement `tail` counts lines, not descriptors.

use nicq_common::barrier;
use nicq_common::desc::{PhaseEntry, TxDesc};
use nicq_common::{DescriptorRing, DeviceMem, Doorbell, RingError};
use tracing::{Span, instrument, trace};

use crate::config::{LlqConfig, Placement};
use crate::error::{QueueError, Result};

/// Number of bounce lines cycled through in push placement.
const BOUNCE_LINES: usize = 4;

/// Push-mode state: the bounce line pool and the burst budget.
#[derive(Debug)]
struct LlqState {
    pool: Vec<Box<[u64]>>,
    next_to_use: usize,
    active: Option<usize>,
    /// Byte offset of the next descriptor in the active line.
    write_index: usize,
    descs_left: u16,
    descs_per_line: u16,
    before_header: u16,
    header_offset: usize,
    line_size: usize,
    max_burst: Option<u16>,
    burst_left: u16,
}

impl LlqState {
    fn new(llq: &LlqConfig, max_burst: Option<u16>) -> Self {
        let line_size = llq.line_size() as usize;
        Self {
            pool: (0..BOUNCE_LINES)
                .map(|_| vec![0u64; line_size / 8].into_boxed_slice())
                .collect(),
            next_to_use: 0,
            active: None,
            write_index: 0,
            descs_left: 0,
            descs_per_line: llq.descs_per_line(),
            before_header: llq.descs_before_header() as u16,
            header_offset: llq.header_offset(),
            line_size,
            max_burst,
            burst_left: max_burst.unwrap_or(0),
        }
    }

    /// Take the next line from the pool, zeroed, with room for `descs`.
    fn acquire_line(&mut self, descs: u16) -> usize {
        let idx = self.next_to_use;
        self.next_to_use = (idx + 1) % BOUNCE_LINES;
        self.pool[idx].fill(0);
        self.active = Some(idx);
        self.write_index = 0;
        self.descs_left = descs;
        idx
    }

    fn active_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let idx = self.active?;
        Some(bytemuck::cast_slice_mut(&mut self.pool[idx][..]))
    }

    fn lines_needed(&self, num_descs: u16) -> u16 {
        if num_descs <= self.before_header {
            return 1;
        }
        1 + (num_descs - self.before_header).div_ceil(self.descs_per_line)
    }
}

pub struct SubmissionQueue<M, D> {
    ring: DescriptorRing<M>,
    doorbell: D,
    max_header_size: usize,
    llq: Option<LlqState>,
    /// Tail last written to the doorbell.
    notified_tail: u16,
    lines_pushed: u64,
}

impl<M: DeviceMem, D: Doorbell> SubmissionQueue<M, D> {
    /// Bytes of ring memory a queue of `depth` slots needs.
    pub fn required_size(depth: u16, llq: Option<&LlqConfig>) -> usize {
        let slot_size = llq.map_or(TxDesc::SIZE, |llq| llq.line_size() as usize);
        DescriptorRing::<M>::required_size(depth, slot_size)
    }

    /// Create a queue whose descriptors live in host memory at `base`.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace")]
    pub fn new(mem: M, base: u64, depth: u16, doorbell: D, max_header_size: u16) -> Result<Self> {
        Ok(Self {
            ring: DescriptorRing::new(mem, base, depth, TxDesc::SIZE)?,
            doorbell,
            max_header_size: max_header_size as usize,
            llq: None,
            notified_tail: 0,
            lines_pushed: 0,
        })
    }

    /// Create a push-mode queue over `depth` lines of device memory at `base`.
    ///
    /// `max_burst` is the number of lines the device accepts per doorbell,
    /// when it enforces a limit.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace")]
    pub fn new_llq(
        mem: M,
        base: u64,
        depth: u16,
        doorbell: D,
        llq: &LlqConfig,
        max_header_size: u16,
        max_burst: Option<u16>,
    ) -> Result<Self> {
        if max_burst == Some(0) {
            return Err(QueueError::InvalidConfig("push burst must allow at least one line"));
        }

        let state = LlqState::new(llq, max_burst);
        let max_header_size = (max_header_size as usize).min(state.line_size - state.header_offset);

        Ok(Self {
            ring: DescriptorRing::new(mem, base, depth, llq.line_size() as usize)?,
            doorbell,
            max_header_size,
            llq: Some(state),
            notified_tail: 0,
            lines_pushed: 0,
        })
    }

    pub fn placement(&self) -> Placement {
        match self.llq {
            Some(_) => Placement::Device,
            None => Placement::Host,
        }
    }

    /// Phase stamped on descriptors submitted next.
    pub fn phase(&self) -> bool {
        self.ring.submit_phase()
    }

    pub fn depth(&self) -> u16 {
        self.ring.depth()
    }

    pub fn tail(&self) -> u16 {
        self.ring.tail()
    }

    pub fn head(&self) -> u16 {
        self.ring.head()
    }

    /// Free ring slots; lines in push placement.
    pub fn free(&self) -> u16 {
        self.ring.free()
    }

    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }

    /// Lines copied to the device so far.
    pub fn lines_pushed(&self) -> u64 {
        self.lines_pushed
    }

    /// Whether `num_descs` more descriptors fit the ring.
    pub fn have_enough_space(&self, num_descs: u16) -> bool {
        match &self.llq {
            None => self.ring.free() >= num_descs,
            Some(llq) => self.ring.free() > num_descs / llq.descs_per_line + 2,
        }
    }

    /// Lines a packet of `num_descs` descriptors occupies in push placement.
    pub fn lines_needed(&self, num_descs: u16) -> u16 {
        self.llq.as_ref().map_or(num_descs, |llq| llq.lines_needed(num_descs))
    }

    /// Lines left in the burst budget, if the device enforces one.
    pub fn burst_left(&self) -> Option<u16> {
        let llq = self.llq.as_ref()?;
        llq.max_burst.map(|_| llq.burst_left)
    }

    /// Whether the doorbell must be rung before a packet of `num_descs`
    /// descriptors so the burst budget covers it.
    pub fn is_doorbell_needed(&self, num_descs: u16) -> bool {
        match self.burst_left() {
            Some(left) => self.lines_needed(num_descs) > left,
            None => false,
        }
    }

    /// Open a packet in push placement and copy its header after the
    /// descriptors that precede it. Does nothing in host placement.
    pub(crate) fn stage_header(&mut self, header: &[u8]) -> Result<()> {
        let Some(llq) = self.llq.as_mut() else {
            return Ok(());
        };

        let max = llq.line_size - llq.header_offset;
        if header.len() > max {
            return Err(QueueError::HeaderTooLarge {
                len: header.len(),
                max,
            });
        }

        if llq.active.is_some() {
            trace!("discarding unfinished bounce line");
        }

        let offset = llq.header_offset;
        let descs = llq.before_header;
        llq.acquire_line(descs);
        let line = llq.active_bytes_mut().ok_or(QueueError::BounceBufferMissing)?;
        line[offset..offset + header.len()].copy_from_slice(header);
        Ok(())
    }

    /// Write one descriptor at the tail, stamped with the current phase.
    pub(crate) fn submit<T: PhaseEntry>(&mut self, mut desc: T) -> Result<()> {
        if self.llq.is_none() {
            let slot = self.ring.next_submit_slot().map_err(|e| match e {
                RingError::Full => QueueError::NotEnoughSpace {
                    needed: 1,
                    free: 0,
                },
                e => e.into(),
            })?;
            return Ok(self.ring.publish(&slot, desc)?);
        }

        let phase = self.ring.submit_phase();
        let llq = self.llq.as_mut().ok_or(QueueError::BounceBufferMissing)?;
        let at = llq.write_index;

        desc.set_phase(phase);
        let bytes = bytemuck::bytes_of(&desc);
        let line = llq.active_bytes_mut().ok_or(QueueError::BounceBufferMissing)?;
        line.get_mut(at..at + bytes.len())
            .ok_or(RingError::InvalidState)?
            .copy_from_slice(bytes);

        llq.write_index += bytes.len();
        llq.descs_left = llq.descs_left.saturating_sub(1);
        if llq.descs_left == 0 {
            self.flush_line()?;
            if let Some(llq) = self.llq.as_mut() {
                let descs = llq.descs_per_line;
                llq.acquire_line(descs);
            }
        }
        Ok(())
    }

    /// Close the packet being assembled, pushing its last line if it holds
    /// any descriptors.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        let Some(llq) = self.llq.as_mut() else {
            return Ok(());
        };

        if llq.active.is_some() && llq.write_index > 0 {
            self.flush_line()?;
        } else {
            llq.active = None;
        }
        Ok(())
    }

    /// Copy the active line into the line slot at `tail`.
    fn flush_line(&mut self) -> Result<()> {
        let llq = self.llq.as_mut().ok_or(QueueError::BounceBufferMissing)?;
        let idx = llq.active.ok_or(QueueError::BounceBufferMissing)?;

        if llq.max_burst.is_some() && llq.burst_left == 0 {
            return Err(QueueError::WouldBlock);
        }

        let slot = self.ring.next_submit_slot().map_err(|e| match e {
            RingError::Full => QueueError::NotEnoughSpace {
                needed: 1,
                free: 0,
            },
            e => e.into(),
        })?;

        // The line must be complete in host memory before the copy starts.
        barrier::wmb();
        self.ring
            .mem()
            .copy_words(slot.addr, &llq.pool[idx])
            .map_err(|_| RingError::MemError)?;

        if llq.max_burst.is_some() {
            llq.burst_left -= 1;
        }
        llq.active = None;
        self.lines_pushed += 1;
        Ok(())
    }

    /// Tell the device about everything submitted since the last call.
    ///
    /// Returns false without touching the doorbell when there is nothing
    /// new. Ringing the doorbell restores the push burst budget.
    pub fn notify(&mut self) -> bool {
        let tail = self.ring.tail();
        if tail == self.notified_tail {
            return false;
        }

        // Descriptors must be visible before the device sees the new tail.
        barrier::dma_wmb();
        self.doorbell.ring(tail as u32);
        self.notified_tail = tail;

        if let Some(llq) = self.llq.as_mut() {
            if let Some(burst) = llq.max_burst {
                llq.burst_left = burst;
            }
        }
        trace!(tail, "doorbell");
        true
    }

    /// Reclaim `n` slots the device has finished with.
    pub fn release(&mut self, n: u16) -> Result<()> {
        Ok(self.ring.release(n)?)
    }
}

#[cfg(test)]
mod tests {
    use nicq_common::desc::{RxDesc, TxCtrl};
    use nicq_testing::{FakeMem, RecordingDoorbell, SqView};

    use super::*;

    fn host_queue(depth: u16) -> (SubmissionQueue<FakeMem, RecordingDoorbell>, SqView, RecordingDoorbell) {
        let mem = FakeMem::new(1 << 16);
        let base = mem.carve(SubmissionQueue::<FakeMem, RecordingDoorbell>::required_size(depth, None));
        let doorbell = RecordingDoorbell::new();
        let sq = SubmissionQueue::new(mem.clone(), base, depth, doorbell.clone(), 96).unwrap();
        (sq, SqView::new(mem, base, depth, TxDesc::SIZE), doorbell)
    }

    fn llq_queue(
        depth: u16,
        max_burst: Option<u16>,
    ) -> (SubmissionQueue<FakeMem, RecordingDoorbell>, SqView, FakeMem, RecordingDoorbell) {
        let llq = LlqConfig::default();
        let mem = FakeMem::new(1 << 16);
        let base = mem.carve(SubmissionQueue::<FakeMem, RecordingDoorbell>::required_size(depth, Some(&llq)));
        let doorbell = RecordingDoorbell::new();
        let sq = SubmissionQueue::new_llq(mem.clone(), base, depth, doorbell.clone(), &llq, 96, max_burst)
            .unwrap();
        let view = SqView::new(mem.clone(), base, depth, llq.line_size() as usize);
        (sq, view, mem, doorbell)
    }

    fn data_desc(len: u16, req_id: u16) -> TxDesc {
        TxDesc::new(TxCtrl::FIRST | TxCtrl::LAST, len, req_id)
    }

    #[test]
    fn host_submit_publishes_with_phase() {
        let (mut sq, view, doorbell) = host_queue(4);
        assert_eq!(sq.placement(), Placement::Host);

        sq.submit(data_desc(60, 1)).unwrap();
        sq.submit(data_desc(61, 2)).unwrap();

        let first: TxDesc = view.entry(0);
        assert_eq!(first.length(), 60);
        assert_eq!(first.req_id(), 1);
        assert!(first.phase());
        assert_eq!(sq.tail(), 2);
        assert_eq!(doorbell.count(), 0);

        assert!(sq.notify());
        assert_eq!(doorbell.writes(), vec![2]);
        assert!(!sq.notify(), "no new work, no doorbell");
    }

    #[test]
    fn host_overflow_is_not_enough_space() {
        let (mut sq, _, _) = host_queue(4);
        for i in 0..4 {
            sq.submit(data_desc(64, i)).unwrap();
        }
        assert!(!sq.have_enough_space(1));
        assert!(matches!(
            sq.submit(data_desc(64, 4)),
            Err(QueueError::NotEnoughSpace { .. })
        ));

        sq.release(2).unwrap();
        assert!(sq.have_enough_space(2));
        assert!(!sq.have_enough_space(3));
        assert!(matches!(sq.release(3), Err(QueueError::Ring(RingError::InvalidState))));
    }

    #[test]
    fn host_phase_flips_after_a_lap() {
        let (mut sq, view, _) = host_queue(2);
        sq.submit(RxDesc::new(0, 0x1000, 2048)).unwrap();
        sq.submit(RxDesc::new(1, 0x2000, 2048)).unwrap();
        sq.release(2).unwrap();
        assert!(!sq.phase());

        sq.submit(RxDesc::new(0, 0x3000, 2048)).unwrap();
        let entry: RxDesc = view.entry(2);
        assert!(!entry.phase());
        assert_eq!(entry.buffer_addr(), 0x3000);
    }

    #[test]
    fn llq_header_follows_leading_descriptors() {
        let (mut sq, view, mem, _) = llq_queue(8, None);
        assert_eq!(sq.placement(), Placement::Device);
        assert_eq!(sq.max_header_size(), 96);

        let header = [0xabu8; 42];
        sq.stage_header(&header).unwrap();
        sq.submit(data_desc(100, 7)).unwrap();
        assert_eq!(sq.tail(), 0, "line not pushed before it is closed");

        sq.finalize().unwrap();
        assert_eq!(sq.tail(), 1);
        assert_eq!(sq.lines_pushed(), 1);
        assert_eq!(mem.word_copies(), 1);

        let desc: TxDesc = view.line_entry(0, 0);
        assert_eq!(desc.length(), 100);
        assert!(desc.phase());
        let line = view.line(0);
        assert_eq!(&line[32..74], &header[..]);
        assert!(line[16..32].iter().all(|b| *b == 0));
    }

    #[test]
    fn llq_spills_into_continuation_lines() {
        let (mut sq, view, _, _) = llq_queue(8, None);
        sq.stage_header(&[1u8; 14]).unwrap();

        // Two descriptors fill the first line, eight the next, one more the third.
        for i in 0..11u16 {
            sq.submit(data_desc(i + 1, 3)).unwrap();
        }
        assert_eq!(sq.tail(), 2);
        sq.finalize().unwrap();
        assert_eq!(sq.tail(), 3);
        assert_eq!(sq.lines_needed(11), 3);

        let second: TxDesc = view.line_entry(1, 0);
        assert_eq!(second.length(), 3);
        let last: TxDesc = view.line_entry(2, 0);
        assert_eq!(last.length(), 11);
    }

    #[test]
    fn llq_exact_fit_pushes_no_empty_line() {
        let (mut sq, _, _, _) = llq_queue(8, None);
        sq.stage_header(&[]).unwrap();
        sq.submit(data_desc(1, 0)).unwrap();
        sq.submit(data_desc(2, 0)).unwrap();
        assert_eq!(sq.tail(), 1);
        sq.finalize().unwrap();
        assert_eq!(sq.tail(), 1);
    }

    #[test]
    fn llq_header_too_large() {
        let (mut sq, _, _, _) = llq_queue(8, None);
        let header = [0u8; 97];
        assert!(matches!(
            sq.stage_header(&header),
            Err(QueueError::HeaderTooLarge { len: 97, max: 96 })
        ));
    }

    #[test]
    fn llq_submit_without_line_is_fatal() {
        let (mut sq, _, _, _) = llq_queue(8, None);
        let err = sq.submit(data_desc(1, 0)).unwrap_err();
        assert!(matches!(err, QueueError::BounceBufferMissing));
        assert!(err.is_fatal());
    }

    #[test]
    fn llq_burst_budget_restored_by_doorbell() {
        let (mut sq, _, _, doorbell) = llq_queue(16, Some(2));
        assert_eq!(sq.burst_left(), Some(2));

        for _ in 0..2 {
            sq.stage_header(&[0u8; 14]).unwrap();
            sq.submit(data_desc(64, 0)).unwrap();
            sq.finalize().unwrap();
        }
        assert_eq!(sq.burst_left(), Some(0));
        assert!(sq.is_doorbell_needed(1));

        sq.stage_header(&[0u8; 14]).unwrap();
        sq.submit(data_desc(64, 0)).unwrap();
        assert!(matches!(sq.finalize(), Err(QueueError::WouldBlock)));
        assert_eq!(sq.tail(), 2);

        assert!(sq.notify());
        assert_eq!(doorbell.last(), Some(2));
        assert_eq!(sq.burst_left(), Some(2));
        assert!(!sq.is_doorbell_needed(1));
    }

    #[test]
    fn llq_lines_carry_the_phase_of_their_lap() {
        let depth = 4u16;
        let (mut sq, view, _, _) = llq_queue(depth, None);

        // Run until the 16-bit tail has wrapped back to the first slot.
        let laps = (u16::MAX as u32 + 1) / depth as u32 + 1;
        for lap in 0..laps {
            for i in 0..depth {
                sq.stage_header(&[0u8; 14]).unwrap();
                sq.submit(data_desc(64, i)).unwrap();
                sq.finalize().unwrap();
            }

            let first: TxDesc = view.line_entry(0, 0);
            assert_eq!(first.phase(), lap % 2 == 0, "lap {lap}");
            let last: TxDesc = view.line_entry(depth - 1, 0);
            assert_eq!(last.phase(), lap % 2 == 0, "lap {lap}");
            sq.release(depth).unwrap();
        }
        assert_eq!(sq.tail(), depth);
        assert_eq!(sq.lines_pushed(), laps as u64 * depth as u64);
    }

    #[test]
    fn llq_space_accounts_for_lines() {
        let (sq, _, _, _) = llq_queue(4, None);
        // 4 free lines: 8 descriptors need 8/8 + 2 = 3 < 4
        assert!(sq.have_enough_space(8));
        assert!(!sq.have_enough_space(16));
        assert_eq!(sq.lines_needed(1), 1);
        assert_eq!(sq.lines_needed(2), 1);
        assert_eq!(sq.lines_needed(3), 2);
        assert_eq!(sq.lines_needed(10), 2);
        assert_eq!(sq.lines_needed(18), 3);
        assert!(!sq.is_doorbell_needed(18), "no budget enforced");
    }

    #[test]
    fn zero_burst_is_rejected() {
        let llq = LlqConfig::default();
        let mem = FakeMem::new(4096);
        let base = mem.carve(1024);
        assert!(matches!(
            SubmissionQueue::new_llq(mem, base, 8, RecordingDoorbell::new(), &llq, 96, Some(0)),
            Err(QueueError::InvalidConfig(_))
        ));
    }
}
