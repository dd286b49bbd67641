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

//! Packet to descriptor conversion.
//!
//! A packet becomes an optional metadata descriptor followed by one data
//! descriptor per buffer:
//!
//! ```text
//!  ┌───────────────┐┌──────────────────┐┌────────┐┌────────────────────┐
//!  │ meta (FIRST,  ││ data 0           ││ data i ││ data n-1           │
//!  │ META_STORE)   ││ hdr len, offload ││        ││ LAST, COMP_REQ     │
//!  └───────────────┘└──────────────────┘└────────┘└────────────────────┘
//!   only when the metadata changed        FIRST moves to data 0 when
//!   or caching is off                     no meta descriptor is sent
//! ```
//!
//! The device remembers the last stored metadata, so consecutive packets of
//! one flow skip the metadata descriptor entirely.

use nicq_common::desc::{TxCtrl, TxDesc, TxMeta, TxMetaDesc, TxOffloadFlags};
use nicq_common::{DeviceMem, Doorbell};

use crate::config::Placement;
use crate::error::{QueueError, Result};
use crate::sq::SubmissionQueue;

/// One device-addressable piece of a packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxBuffer {
    pub addr: u64,
    pub len: u16,
}

/// Everything [`TxEngine::prepare_tx`] needs to know about a packet.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxContext<'a> {
    /// Header bytes pushed inline with the descriptors. Required in push
    /// placement, where it may be empty; ignored in host placement.
    pub push_header: Option<&'a [u8]>,
    pub buffers: &'a [TxBuffer],
    pub req_id: u16,
    pub meta: Option<TxMeta>,
    /// Set the IPv4 don't-fragment bit.
    pub df: bool,
}

impl TxContext<'_> {
    fn header(&self) -> &[u8] {
        self.push_header.unwrap_or(&[])
    }

    /// Data descriptors this packet produces. A header-only packet still
    /// needs one to carry the header length.
    fn data_descs(&self) -> u16 {
        if self.buffers.is_empty() && self.header().is_empty() {
            0
        } else {
            u16::try_from(self.buffers.len()).unwrap_or(u16::MAX).max(1)
        }
    }
}

/// Outcome of [`TxEngine::prepare_tx`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxPrepared {
    /// Ring slots consumed: descriptors in host placement, lines in push
    /// placement. Released again when the packet completes.
    pub slots: u16,
    pub meta_emitted: bool,
}

#[derive(Debug)]
pub struct TxEngine {
    meta_caching: bool,
    cached_meta: Option<TxMeta>,
    max_tx_sgl: u16,
}

impl TxEngine {
    pub fn new(meta_caching: bool, max_tx_sgl: u16) -> Self {
        Self {
            meta_caching,
            cached_meta: None,
            max_tx_sgl,
        }
    }

    pub fn meta_caching(&self) -> bool {
        self.meta_caching
    }

    /// Metadata the device holds from the last metadata descriptor.
    pub fn cached_meta(&self) -> Option<&TxMeta> {
        self.cached_meta.as_ref()
    }

    /// Forget the cached metadata so the next packet sends it again.
    pub fn invalidate_meta(&mut self) {
        self.cached_meta = None;
    }

    fn meta_to_emit(&self, ctx: &TxContext<'_>) -> Option<TxMeta> {
        if !self.meta_caching {
            return Some(ctx.meta.unwrap_or_default());
        }

        match ctx.meta {
            Some(meta) if self.cached_meta != Some(meta) => Some(meta),
            _ => None,
        }
    }

    fn descs_needed(&self, ctx: &TxContext<'_>) -> u16 {
        ctx.data_descs() + self.meta_to_emit(ctx).is_some() as u16
    }

    /// Whether the doorbell must be rung before `ctx` so the push burst
    /// budget covers it.
    pub fn is_doorbell_needed<M: DeviceMem, D: Doorbell>(
        &self,
        sq: &SubmissionQueue<M, D>,
        ctx: &TxContext<'_>,
    ) -> bool {
        sq.is_doorbell_needed(self.descs_needed(ctx))
    }

    /// Write the descriptors for one packet.
    ///
    /// Every check runs before anything is written, so an error leaves the
    /// queue untouched. The caller rings the doorbell.
    pub fn prepare_tx<M: DeviceMem, D: Doorbell>(
        &mut self,
        sq: &mut SubmissionQueue<M, D>,
        ctx: &TxContext<'_>,
    ) -> Result<TxPrepared> {
        let num_bufs = ctx.buffers.len();
        if num_bufs > self.max_tx_sgl as usize {
            return Err(QueueError::InvalidBufferCount {
                count: num_bufs,
                max: self.max_tx_sgl as usize,
            });
        }

        // One slot on top of the buffers for a metadata descriptor.
        let needed = num_bufs as u16 + 1;
        if !sq.have_enough_space(needed) {
            return Err(QueueError::NotEnoughSpace {
                needed,
                free: sq.free(),
            });
        }

        let header = ctx.header();
        let max_header = sq.max_header_size().min(u8::MAX as usize);
        let header_len = match u8::try_from(header.len()) {
            Ok(len) if header.len() <= max_header => len,
            _ => {
                return Err(QueueError::HeaderTooLarge {
                    len: header.len(),
                    max: max_header,
                });
            }
        };

        if sq.placement() == Placement::Device && ctx.push_header.is_none() {
            return Err(QueueError::MissingPushHeader);
        }

        let meta = self.meta_to_emit(ctx);
        let data_descs = ctx.data_descs();
        if let Some(left) = sq.burst_left() {
            if sq.lines_needed(data_descs + meta.is_some() as u16) > left {
                return Err(QueueError::WouldBlock);
            }
        }

        let start = sq.tail();
        sq.stage_header(header)?;

        if let Some(meta) = &meta {
            sq.submit(TxMetaDesc::new(meta, ctx.req_id))?;
        }

        if data_descs > 0 {
            let mut offload = ctx.meta.map(|m| m.offload).unwrap_or_default();
            if ctx.df {
                offload.flags |= TxOffloadFlags::DF;
            }

            for i in 0..data_descs {
                let mut ctrl = TxCtrl::empty();
                if i == 0 && meta.is_none() {
                    ctrl |= TxCtrl::FIRST;
                }
                if i == data_descs - 1 {
                    ctrl |= TxCtrl::LAST | TxCtrl::COMP_REQ;
                }

                let buf = ctx.buffers.get(i as usize).copied().unwrap_or_default();
                let mut desc = TxDesc::new(ctrl, buf.len, ctx.req_id);
                desc.set_buffer(buf.addr);
                if i == 0 {
                    desc.set_header_length(header_len);
                    desc.set_offload(&offload);
                }
                sq.submit(desc)?;
            }
        }

        sq.finalize()?;

        // Only metadata that reached the ring is known to the device.
        if self.meta_caching && meta.is_some() {
            self.cached_meta = meta;
        }

        Ok(TxPrepared {
            slots: sq.tail().wrapping_sub(start),
            meta_emitted: meta.is_some(),
        })
    }
}
