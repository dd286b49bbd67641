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

//! Descriptor Wire Formats
//!
//! Every structure in this module is the exact little-endian layout the
//! device reads or writes. Fields hold wire (little-endian) values; the
//! accessors convert to and from native integers, so the raw structs can be
//! copied byte-for-byte into ring memory on any host.
//!
//! All descriptor kinds keep their phase bit at bit 24 of the first 32-bit
//! word. The ring relies on this to test ownership with a single acquire
//! load, whatever the entry type.
//!
//! ```text
//!  word0 bit:  31      28 27 26 25 24 23                          0
//!             ┌──────────┬──┬──┬──┬──┬─────────────────────────────┐
//!   TX desc   │ comp_req │L │F │  │P │ meta, req_id_hi, length     │
//!   RX cdesc  │ buffer.. │L │F │c2│P │ csum/proto status bits      │
//!   RX desc   │ ctrl byte: comp_req L F . P │ reserved │ length     │
//!   TX cdesc  │ flags byte:           . P   │ status   │ req_id     │
//!             └─────────────────────────────┴──────────┴────────────┘
//! ```

mod completion;
mod rx;
mod tx;

use bytemuck::Pod;
pub use completion::{RxCompletion, RxCompletionExt, RxStatus, TxCompletion};
pub use rx::{RxCtrl, RxDesc};
pub use tx::{TxCtrl, TxDesc, TxMeta, TxMetaDesc, TxOffload, TxOffloadFlags};

/// Phase bit position shared by every descriptor kind.
pub const PHASE_SHIFT: u32 = 24;
/// Phase bit mask within the first little-endian word of any entry.
pub const PHASE_BIT: u32 = 1 << PHASE_SHIFT;

/// A ring entry carrying a phase bit.
pub trait PhaseEntry: Pod {
    /// Phase stamped by the producer of this entry.
    fn phase(&self) -> bool;

    /// Stamp the producer's current phase.
    fn set_phase(&mut self, phase: bool);
}

/// Layer 3 protocol index used by TX offloads and reported by RX completions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum L3Proto {
    #[default]
    Unknown = 0,
    Ipv4 = 8,
    Ipv6 = 11,
    Fcoe = 21,
    Roce = 22,
}

impl L3Proto {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            8 => Self::Ipv4,
            11 => Self::Ipv6,
            21 => Self::Fcoe,
            22 => Self::Roce,
            _ => Self::Unknown,
        }
    }
}

/// Layer 4 protocol index used by TX offloads and reported by RX completions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum L4Proto {
    #[default]
    Unknown = 0,
    Tcp = 12,
    Udp = 13,
    RoutableRoce = 23,
}

impl L4Proto {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            12 => Self::Tcp,
            13 => Self::Udp,
            23 => Self::RoutableRoce,
            _ => Self::Unknown,
        }
    }
}

/// Extract `(word >> shift) & mask`.
#[inline]
pub(crate) const fn field(word: u32, shift: u32, mask: u32) -> u32 {
    (word >> shift) & mask
}

/// Replace the bits selected by `mask << shift` in `word` with `val`.
#[inline]
pub(crate) const fn with_field(word: u32, shift: u32, mask: u32, val: u32) -> u32 {
    (word & !(mask << shift)) | ((val & mask) << shift)
}
