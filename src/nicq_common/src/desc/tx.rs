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
    /// Control bits of the first word of TX data and metadata descriptors.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TxCtrl: u32 {
        /// Metadata descriptor only: the extended fields are valid.
        const EXT_VALID     = 1 << 14;
        /// Metadata descriptor only: extended metadata format.
        const ETH_META_TYPE = 1 << 20;
        /// Metadata descriptor only: device stores the metadata for later packets.
        const META_STORE    = 1 << 21;
        /// Descriptor is a metadata descriptor.
        const META_DESC     = 1 << 23;
        const PHASE         = PHASE_BIT;
        /// First descriptor of a packet.
        const FIRST         = 1 << 26;
        /// Last descriptor of a packet.
        const LAST          = 1 << 27;
        /// Device must post a completion for this packet.
        const COMP_REQ      = 1 << 28;
    }
}

bitflags! {
    /// Offload bits carried in the second word of a TX data descriptor.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TxOffloadFlags: u32 {
        /// IPv4 don't-fragment.
        const DF              = 1 << 4;
        const TSO_EN          = 1 << 7;
        const L3_CSUM_EN      = 1 << 13;
        const L4_CSUM_EN      = 1 << 14;
        const ETH_FCS_DIS     = 1 << 15;
        const L4_CSUM_PARTIAL = 1 << 17;
    }
}

const LENGTH_MASK: u32 = 0xffff;
const REQ_ID_HI_SHIFT: u32 = 16;
const REQ_ID_HI_MASK: u32 = 0x3f;
const REQ_ID_LO_SHIFT: u32 = 22;
const REQ_ID_LO_MASK: u32 = 0x3ff;
const L3_PROTO_MASK: u32 = 0xf;
const L4_PROTO_SHIFT: u32 = 8;
const L4_PROTO_MASK: u32 = 0x1f;
const ADDR_HI_MASK: u32 = 0xffff;
const HEADER_LENGTH_SHIFT: u32 = 24;
const HEADER_LENGTH_MASK: u32 = 0xff;

/// Checksum and segmentation offloads requested for a packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxOffload {
    pub flags: TxOffloadFlags,
    pub l3_proto: L3Proto,
    pub l4_proto: L4Proto,
}

/// Per-packet metadata the device needs for offloads.
///
/// Consecutive packets of one flow usually share it, which is what makes
/// caching it on the device worthwhile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxMeta {
    /// Maximum segment size, 14 bits on the wire.
    pub mss: u16,
    pub l3_hdr_len: u8,
    pub l3_hdr_offset: u8,
    /// L4 header length in 32-bit words, 6 bits on the wire.
    pub l4_hdr_len: u8,
    pub offload: TxOffload,
}

/// TX data descriptor.
///
/// ```text
/// word0 len_ctrl    15:0 length | 21:16 req_id[15:10] | 23 meta | 24 phase
///                   26 first | 27 last | 28 comp_req
/// word1 meta_ctrl   3:0 l3_proto | 4 DF | 7 tso | 12:8 l4_proto
///                   13 l3_csum | 14 l4_csum | 17 l4_partial | 31:22 req_id[9:0]
/// word2             buffer address [31:0]
/// word3             15:0 buffer address [47:32] | 31:24 header length
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct TxDesc {
    len_ctrl: u32,
    meta_ctrl: u32,
    buff_addr_lo: u32,
    buff_addr_hi_hdr_sz: u32,
}

/// TX metadata descriptor, occupies a data descriptor slot.
///
/// ```text
/// word0 len_ctrl    9:0 req_id[9:0] | 14 ext_valid | 19:16 mss[13:10]
///                   20 meta_type | 21 meta_store | 23 meta | 24 phase
///                   26 first | 27 last | 28 comp_req
/// word1             5:0 req_id[15:10]
/// word2             7:0 l3_hdr_len | 15:8 l3_hdr_off | 21:16 l4_hdr_len
///                   31:22 mss[9:0]
/// word3             reserved
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct TxMetaDesc {
    len_ctrl: u32,
    word1: u32,
    word2: u32,
    reserved: u32,
}

const _: () = assert!(core::mem::size_of::<TxDesc>() == 16);
const _: () = assert!(core::mem::size_of::<TxDesc>() == core::mem::size_of::<TxMetaDesc>());

impl TxDesc {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Create a data descriptor; the phase is stamped on submission.
    pub fn new(ctrl: TxCtrl, length: u16, req_id: u16) -> Self {
        let ctrl = ctrl.difference(TxCtrl::META_DESC | TxCtrl::PHASE);
        let len_ctrl = ctrl.bits() | length as u32;
        let len_ctrl = with_field(
            len_ctrl,
            REQ_ID_HI_SHIFT,
            REQ_ID_HI_MASK,
            (req_id >> 10) as u32,
        );
        let meta_ctrl = with_field(0, REQ_ID_LO_SHIFT, REQ_ID_LO_MASK, req_id as u32);
        Self {
            len_ctrl: len_ctrl.to_le(),
            meta_ctrl: meta_ctrl.to_le(),
            buff_addr_lo: 0,
            buff_addr_hi_hdr_sz: 0,
        }
    }

    #[inline]
    pub fn ctrl(&self) -> TxCtrl {
        TxCtrl::from_bits_truncate(u32::from_le(self.len_ctrl))
    }

    pub fn insert_ctrl(&mut self, ctrl: TxCtrl) {
        self.len_ctrl = (u32::from_le(self.len_ctrl) | ctrl.bits()).to_le();
    }

    #[inline]
    pub fn length(&self) -> u16 {
        field(u32::from_le(self.len_ctrl), 0, LENGTH_MASK) as u16
    }

    pub fn set_length(&mut self, length: u16) {
        let word = with_field(u32::from_le(self.len_ctrl), 0, LENGTH_MASK, length as u32);
        self.len_ctrl = word.to_le();
    }

    pub fn req_id(&self) -> u16 {
        let hi = field(u32::from_le(self.len_ctrl), REQ_ID_HI_SHIFT, REQ_ID_HI_MASK);
        let lo = field(u32::from_le(self.meta_ctrl), REQ_ID_LO_SHIFT, REQ_ID_LO_MASK);
        ((hi << 10) | lo) as u16
    }

    /// Point the descriptor at a 48-bit device address.
    pub fn set_buffer(&mut self, addr: u64) {
        self.buff_addr_lo = (addr as u32).to_le();
        let word = with_field(
            u32::from_le(self.buff_addr_hi_hdr_sz),
            0,
            ADDR_HI_MASK,
            (addr >> 32) as u32,
        );
        self.buff_addr_hi_hdr_sz = word.to_le();
    }

    pub fn buffer_addr(&self) -> u64 {
        let hi = field(u32::from_le(self.buff_addr_hi_hdr_sz), 0, ADDR_HI_MASK) as u64;
        (hi << 32) | u32::from_le(self.buff_addr_lo) as u64
    }

    pub fn set_header_length(&mut self, len: u8) {
        let word = with_field(
            u32::from_le(self.buff_addr_hi_hdr_sz),
            HEADER_LENGTH_SHIFT,
            HEADER_LENGTH_MASK,
            len as u32,
        );
        self.buff_addr_hi_hdr_sz = word.to_le();
    }

    pub fn header_length(&self) -> u8 {
        field(
            u32::from_le(self.buff_addr_hi_hdr_sz),
            HEADER_LENGTH_SHIFT,
            HEADER_LENGTH_MASK,
        ) as u8
    }

    /// Merge offload bits and protocol indexes into the second word.
    pub fn set_offload(&mut self, offload: &TxOffload) {
        let mut word = u32::from_le(self.meta_ctrl) | offload.flags.bits();
        word = with_field(word, 0, L3_PROTO_MASK, offload.l3_proto as u32);
        word = with_field(word, L4_PROTO_SHIFT, L4_PROTO_MASK, offload.l4_proto as u32);
        self.meta_ctrl = word.to_le();
    }

    pub fn offload(&self) -> TxOffload {
        let word = u32::from_le(self.meta_ctrl);
        TxOffload {
            flags: TxOffloadFlags::from_bits_truncate(word),
            l3_proto: L3Proto::from_raw(field(word, 0, L3_PROTO_MASK) as u8),
            l4_proto: L4Proto::from_raw(field(word, L4_PROTO_SHIFT, L4_PROTO_MASK) as u8),
        }
    }
}

impl PhaseEntry for TxDesc {
    #[inline]
    fn phase(&self) -> bool {
        u32::from_le(self.len_ctrl) & PHASE_BIT != 0
    }

    #[inline]
    fn set_phase(&mut self, phase: bool) {
        let word = u32::from_le(self.len_ctrl) & !PHASE_BIT;
        self.len_ctrl = (word | if phase { PHASE_BIT } else { 0 }).to_le();
    }
}

const META_REQ_ID_LO_MASK: u32 = 0x3ff;
const META_REQ_ID_HI_MASK: u32 = 0x3f;
const MSS_HI_SHIFT: u32 = 16;
const MSS_HI_MASK: u32 = 0xf;
const L3_HDR_OFF_SHIFT: u32 = 8;
const L4_HDR_LEN_SHIFT: u32 = 16;
const L4_HDR_LEN_MASK: u32 = 0x3f;
const MSS_LO_SHIFT: u32 = 22;
const MSS_LO_MASK: u32 = 0x3ff;

impl TxMetaDesc {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Encode an extended metadata descriptor that the device should store.
    ///
    /// The descriptor opens the packet, so it carries `FIRST` and the data
    /// descriptors that follow do not.
    pub fn new(meta: &TxMeta, req_id: u16) -> Self {
        let ctrl = TxCtrl::META_DESC
            | TxCtrl::EXT_VALID
            | TxCtrl::ETH_META_TYPE
            | TxCtrl::META_STORE
            | TxCtrl::FIRST;
        let mss = meta.mss as u32;

        let mut len_ctrl = ctrl.bits();
        len_ctrl = with_field(len_ctrl, 0, META_REQ_ID_LO_MASK, req_id as u32);
        len_ctrl = with_field(len_ctrl, MSS_HI_SHIFT, MSS_HI_MASK, mss >> 10);

        let mut word2 = meta.l3_hdr_len as u32;
        word2 = with_field(word2, L3_HDR_OFF_SHIFT, 0xff, meta.l3_hdr_offset as u32);
        word2 = with_field(word2, L4_HDR_LEN_SHIFT, L4_HDR_LEN_MASK, meta.l4_hdr_len as u32);
        word2 = with_field(word2, MSS_LO_SHIFT, MSS_LO_MASK, mss);

        Self {
            len_ctrl: len_ctrl.to_le(),
            word1: (((req_id as u32) >> 10) & META_REQ_ID_HI_MASK).to_le(),
            word2: word2.to_le(),
            reserved: 0,
        }
    }

    #[inline]
    pub fn ctrl(&self) -> TxCtrl {
        TxCtrl::from_bits_truncate(u32::from_le(self.len_ctrl))
    }

    pub fn req_id(&self) -> u16 {
        let lo = field(u32::from_le(self.len_ctrl), 0, META_REQ_ID_LO_MASK);
        let hi = field(u32::from_le(self.word1), 0, META_REQ_ID_HI_MASK);
        ((hi << 10) | lo) as u16
    }

    pub fn mss(&self) -> u16 {
        let hi = field(u32::from_le(self.len_ctrl), MSS_HI_SHIFT, MSS_HI_MASK);
        let lo = field(u32::from_le(self.word2), MSS_LO_SHIFT, MSS_LO_MASK);
        ((hi << 10) | lo) as u16
    }

    pub fn l3_hdr_len(&self) -> u8 {
        field(u32::from_le(self.word2), 0, 0xff) as u8
    }

    pub fn l3_hdr_offset(&self) -> u8 {
        field(u32::from_le(self.word2), L3_HDR_OFF_SHIFT, 0xff) as u8
    }

    pub fn l4_hdr_len(&self) -> u8 {
        field(u32::from_le(self.word2), L4_HDR_LEN_SHIFT, L4_HDR_LEN_MASK) as u8
    }
}

impl PhaseEntry for TxMetaDesc {
    #[inline]
    fn phase(&self) -> bool {
        u32::from_le(self.len_ctrl) & PHASE_BIT != 0
    }

    #[inline]
    fn set_phase(&mut self, phase: bool) {
        let word = u32::from_le(self.len_ctrl) & !PHASE_BIT;
        self.len_ctrl = (word | if phase { PHASE_BIT } else { 0 }).to_le();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words<T: Pod>(val: T) -> [u32; 4] {
        bytemuck::cast::<T, [u32; 4]>(val).map(u32::from_le)
    }

    #[test]
    fn data_descriptor_bit_layout() {
        let mut desc = TxDesc::new(TxCtrl::FIRST | TxCtrl::LAST | TxCtrl::COMP_REQ, 1514, 0x1abc);
        desc.set_phase(true);
        desc.set_buffer(0x0000_8765_4321_0000);
        desc.set_header_length(42);
        desc.set_offload(&TxOffload {
            flags: TxOffloadFlags::L3_CSUM_EN | TxOffloadFlags::L4_CSUM_EN | TxOffloadFlags::DF,
            l3_proto: L3Proto::Ipv4,
            l4_proto: L4Proto::Tcp,
        });

        let [w0, w1, w2, w3] = words(desc);
        assert_eq!(w0 & 0xffff, 1514);
        assert_eq!((w0 >> 16) & 0x3f, 0x1abc >> 10);
        assert_eq!(w0 & (1 << 23), 0);
        assert_ne!(w0 & (1 << 24), 0);
        assert_ne!(w0 & (1 << 26), 0);
        assert_ne!(w0 & (1 << 27), 0);
        assert_ne!(w0 & (1 << 28), 0);

        assert_eq!(w1 & 0xf, 8);
        assert_ne!(w1 & (1 << 4), 0);
        assert_eq!((w1 >> 8) & 0x1f, 12);
        assert_ne!(w1 & (1 << 13), 0);
        assert_ne!(w1 & (1 << 14), 0);
        assert_eq!(w1 >> 22, 0x1abc & 0x3ff);

        assert_eq!(w2, 0x4321_0000);
        assert_eq!(w3 & 0xffff, 0x8765);
        assert_eq!(w3 >> 24, 42);

        assert_eq!(desc.req_id(), 0x1abc);
        assert_eq!(desc.length(), 1514);
        assert_eq!(desc.buffer_addr(), 0x0000_8765_4321_0000);
        assert_eq!(desc.header_length(), 42);
        assert_eq!(desc.offload().l4_proto, L4Proto::Tcp);
        assert!(desc.ctrl().contains(TxCtrl::PHASE | TxCtrl::FIRST));
    }

    #[test]
    fn new_ignores_phase_and_meta_bits() {
        let desc = TxDesc::new(TxCtrl::PHASE | TxCtrl::META_DESC | TxCtrl::LAST, 0, 0);
        assert!(!desc.phase());
        assert_eq!(desc.ctrl(), TxCtrl::LAST);
    }

    #[test]
    fn phase_toggles_without_touching_other_bits() {
        let mut desc = TxDesc::new(TxCtrl::LAST, 60, 7);
        desc.set_phase(true);
        assert!(desc.phase());
        desc.set_phase(false);
        assert!(!desc.phase());
        assert_eq!(desc.length(), 60);
        assert_eq!(desc.req_id(), 7);
    }

    #[test]
    fn meta_descriptor_bit_layout() {
        let meta = TxMeta {
            mss: 0x2abc,
            l3_hdr_len: 20,
            l3_hdr_offset: 14,
            l4_hdr_len: 5,
            offload: TxOffload::default(),
        };
        let mut desc = TxMetaDesc::new(&meta, 0x0433);
        desc.set_phase(true);

        let [w0, w1, w2, w3] = words(desc);
        assert_eq!(w0 & 0x3ff, 0x0433 & 0x3ff);
        assert_ne!(w0 & (1 << 14), 0);
        assert_eq!((w0 >> 16) & 0xf, 0x2abc >> 10);
        assert_ne!(w0 & (1 << 20), 0);
        assert_ne!(w0 & (1 << 21), 0);
        assert_ne!(w0 & (1 << 23), 0);
        assert_ne!(w0 & (1 << 24), 0);
        assert_ne!(w0 & (1 << 26), 0);
        assert_eq!(w0 & (1 << 27), 0);
        assert_eq!(w1, 0x0433 >> 10);
        assert_eq!(w2 & 0xff, 20);
        assert_eq!((w2 >> 8) & 0xff, 14);
        assert_eq!((w2 >> 16) & 0x3f, 5);
        assert_eq!(w2 >> 22, 0x2abc & 0x3ff);
        assert_eq!(w3, 0);

        assert_eq!(desc.mss(), 0x2abc);
        assert_eq!(desc.req_id(), 0x0433);
        assert_eq!(desc.l3_hdr_len(), 20);
        assert_eq!(desc.l3_hdr_offset(), 14);
        assert_eq!(desc.l4_hdr_len(), 5);
    }
}
