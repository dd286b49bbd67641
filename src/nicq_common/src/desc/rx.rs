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

use super::PhaseEntry;

bitflags! {
    /// Control byte of an RX descriptor.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RxCtrl: u8 {
        const PHASE    = 1 << 0;
        const FIRST    = 1 << 2;
        const LAST     = 1 << 3;
        const COMP_REQ = 1 << 4;
    }
}

/// RX descriptor posted to the device to describe an empty buffer.
///
/// A length of zero means 64 KiB.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct RxDesc {
    length: u16,
    reserved2: u8,
    ctrl: u8,
    req_id: u16,
    reserved6: u16,
    buff_addr_lo: u32,
    buff_addr_hi: u16,
    reserved16: u16,
}

const _: () = assert!(core::mem::size_of::<RxDesc>() == 16);
const _: () = assert!(core::mem::offset_of!(RxDesc, ctrl) == 3);
const _: () = assert!(core::mem::offset_of!(RxDesc, buff_addr_lo) == 8);

impl RxDesc {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Describe a single-buffer receive slot that requests a completion.
    pub fn new(req_id: u16, addr: u64, length: u16) -> Self {
        let ctrl = RxCtrl::FIRST | RxCtrl::LAST | RxCtrl::COMP_REQ;
        Self {
            length: length.to_le(),
            reserved2: 0,
            ctrl: ctrl.bits(),
            req_id: req_id.to_le(),
            reserved6: 0,
            buff_addr_lo: (addr as u32).to_le(),
            buff_addr_hi: ((addr >> 32) as u16).to_le(),
            reserved16: 0,
        }
    }

    #[inline]
    pub fn ctrl(&self) -> RxCtrl {
        RxCtrl::from_bits_truncate(self.ctrl)
    }

    pub fn length(&self) -> u16 {
        u16::from_le(self.length)
    }

    pub fn req_id(&self) -> u16 {
        u16::from_le(self.req_id)
    }

    pub fn buffer_addr(&self) -> u64 {
        ((u16::from_le(self.buff_addr_hi) as u64) << 32) | u32::from_le(self.buff_addr_lo) as u64
    }
}

impl PhaseEntry for RxDesc {
    #[inline]
    fn phase(&self) -> bool {
        self.ctrl().contains(RxCtrl::PHASE)
    }

    #[inline]
    fn set_phase(&mut self, phase: bool) {
        let mut ctrl = self.ctrl();
        ctrl.set(RxCtrl::PHASE, phase);
        self.ctrl = ctrl.bits();
    }
}
