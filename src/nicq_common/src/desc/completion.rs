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

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::{L3Proto, L4Proto, PHASE_BIT, PhaseEntry, field, with_field};

bitflags! {
    /// Flag bits of the RX completion status word.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RxStatus: u32 {
        const L3_CSUM_ERR     = 1 << 13;
        const L4_CSUM_ERR     = 1 << 14;
        const IPV4_FRAG       = 1 << 15;
        /// The device validated the L4 checksum.
        const L4_CSUM_CHECKED = 1 << 16;
        const PHASE           = PHASE_BIT;
        /// L3 checksum was validated by the device.
        const L3_CSUM2        = 1 << 25;
        const FIRST           = 1 << 26;
        const LAST            = 1 << 27;
        const BUFFER          = 1 << 30;
    }
}

const L3_PROTO_MASK: u32 = 0x1f;
const SRC_VLAN_CNT_SHIFT: u32 = 5;
const SRC_VLAN_CNT_MASK: u32 = 0x3;
const L4_PROTO_SHIFT: u32 = 8;
const L4_PROTO_MASK: u32 = 0x1f;

/// TX completion posted by the device once a packet has been sent.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct TxCompletion {
    req_id: u16,
    status: u8,
    /// Bit 0 is the phase.
    flags: u8,
    sub_qid: u16,
    sq_head_idx: u16,
}

const _: () = assert!(core::mem::size_of::<TxCompletion>() == 8);

impl TxCompletion {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(req_id: u16) -> Self {
        Self {
            req_id: req_id.to_le(),
            ..Self::default()
        }
    }

    pub fn req_id(&self) -> u16 {
        u16::from_le(self.req_id)
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn sq_head_idx(&self) -> u16 {
        u16::from_le(self.sq_head_idx)
    }

    pub fn with_sq_head_idx(mut self, idx: u16) -> Self {
        self.sq_head_idx = idx.to_le();
        self
    }
}

impl PhaseEntry for TxCompletion {
    #[inline]
    fn phase(&self) -> bool {
        self.flags & 1 != 0
    }

    #[inline]
    fn set_phase(&mut self, phase: bool) {
        self.flags = (self.flags & !1) | phase as u8;
    }
}

/// RX completion describing one filled receive buffer.
///
/// ```text
/// status  4:0 l3_proto | 6:5 src_vlan_cnt | 7 MBZ | 12:8 l4_proto
///         13 l3_csum_err | 14 l4_csum_err | 15 ipv4_frag | 16 l4_csum_checked
///         23:17 MBZ | 24 phase | 25 l3_csum2 | 26 first | 27 last | 30 buffer
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct RxCompletion {
    status: u32,
    length: u16,
    req_id: u16,
    hash: u32,
    sub_qid: u16,
    /// Offset of the packet start within the first buffer.
    offset: u8,
    reserved: u8,
}

/// RX completion with the extended timestamp words.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct RxCompletionExt {
    pub base: RxCompletion,
    timestamp_lo: u32,
    timestamp_hi: u32,
    reserved: [u32; 2],
}

const _: () = assert!(core::mem::size_of::<RxCompletion>() == 16);
const _: () = assert!(core::mem::size_of::<RxCompletionExt>() == 32);

impl RxCompletion {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    /// Status bits the device must leave clear when it advertises
    /// must-be-zero checking.
    pub const MBZ_MASK: u32 = 0x00fe_0080;

    /// Build a completion the way the device would post it.
    pub fn new(flags: RxStatus, length: u16, req_id: u16) -> Self {
        Self {
            status: flags.bits().to_le(),
            length: length.to_le(),
            req_id: req_id.to_le(),
            ..Self::default()
        }
    }

    pub fn with_protocols(mut self, l3: L3Proto, l4: L4Proto) -> Self {
        let mut word = u32::from_le(self.status);
        word = with_field(word, 0, L3_PROTO_MASK, l3 as u32);
        word = with_field(word, L4_PROTO_SHIFT, L4_PROTO_MASK, l4 as u32);
        self.status = word.to_le();
        self
    }

    pub fn with_hash(mut self, hash: u32) -> Self {
        self.hash = hash.to_le();
        self
    }

    pub fn with_offset(mut self, offset: u8) -> Self {
        self.offset = offset;
        self
    }

    /// Set raw status bits, including ones outside [`RxStatus`].
    pub fn with_raw_status(mut self, bits: u32) -> Self {
        self.status = (u32::from_le(self.status) | bits).to_le();
        self
    }

    #[inline]
    pub fn status(&self) -> u32 {
        u32::from_le(self.status)
    }

    #[inline]
    pub fn flags(&self) -> RxStatus {
        RxStatus::from_bits_truncate(self.status())
    }

    /// Must-be-zero bits that are set.
    #[inline]
    pub fn mbz_bits(&self) -> u32 {
        self.status() & Self::MBZ_MASK
    }

    pub fn l3_proto(&self) -> L3Proto {
        L3Proto::from_raw(field(self.status(), 0, L3_PROTO_MASK) as u8)
    }

    pub fn l4_proto(&self) -> L4Proto {
        L4Proto::from_raw(field(self.status(), L4_PROTO_SHIFT, L4_PROTO_MASK) as u8)
    }

    pub fn src_vlan_count(&self) -> u8 {
        field(self.status(), SRC_VLAN_CNT_SHIFT, SRC_VLAN_CNT_MASK) as u8
    }

    pub fn length(&self) -> u16 {
        u16::from_le(self.length)
    }

    pub fn req_id(&self) -> u16 {
        u16::from_le(self.req_id)
    }

    pub fn hash(&self) -> u32 {
        u32::from_le(self.hash)
    }

    pub fn sub_qid(&self) -> u16 {
        u16::from_le(self.sub_qid)
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }
}

impl PhaseEntry for RxCompletion {
    #[inline]
    fn phase(&self) -> bool {
        self.status() & PHASE_BIT != 0
    }

    #[inline]
    fn set_phase(&mut self, phase: bool) {
        let word = self.status() & !PHASE_BIT;
        self.status = (word | if phase { PHASE_BIT } else { 0 }).to_le();
    }
}

impl RxCompletionExt {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(base: RxCompletion, timestamp: u64) -> Self {
        Self {
            base,
            timestamp_lo: (timestamp as u32).to_le(),
            timestamp_hi: ((timestamp >> 32) as u32).to_le(),
            reserved: [0; 2],
        }
    }

    pub fn timestamp(&self) -> u64 {
        ((u32::from_le(self.timestamp_hi) as u64) << 32) | u32::from_le(self.timestamp_lo) as u64
    }
}

impl PhaseEntry for RxCompletionExt {
    #[inline]
    fn phase(&self) -> bool {
        self.base.phase()
    }

    #[inline]
    fn set_phase(&mut self, phase: bool) {
        self.base.set_phase(phase)
    }
}
