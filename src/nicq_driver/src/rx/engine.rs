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

use nicq_common::DeviceMem;
use nicq_common::desc::{L3Proto, L4Proto, RxCompletion, RxStatus};
use smallvec::SmallVec;
use tracing::error;

use crate::cq::{CompletionQueue, PartialPacket};
use crate::error::{Direction, QueueError, Result};

/// One receive buffer of a completed packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxBufInfo {
    pub req_id: u16,
    pub len: u16,
}

/// What the device reported about a received packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxMeta {
    pub l3: L3Proto,
    pub l4: L4Proto,
    pub l3_csum_err: bool,
    pub l4_csum_err: bool,
    pub l4_csum_checked: bool,
    pub ipv4_frag: bool,
    pub hash: u32,
    pub timestamp: Option<u64>,
}

impl RxMeta {
    fn from_completion(cdesc: &RxCompletion, timestamp: Option<u64>) -> Self {
        let flags = cdesc.flags();
        Self {
            l3: cdesc.l3_proto(),
            l4: cdesc.l4_proto(),
            l3_csum_err: flags.contains(RxStatus::L3_CSUM_ERR),
            l4_csum_err: flags.contains(RxStatus::L4_CSUM_ERR),
            l4_csum_checked: flags.contains(RxStatus::L4_CSUM_CHECKED),
            ipv4_frag: flags.contains(RxStatus::IPV4_FRAG),
            hash: cdesc.hash(),
            timestamp,
        }
    }
}

/// A packet whose every completion has been consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxCompletedPacket {
    pub bufs: SmallVec<[RxBufInfo; 4]>,
    /// Offset of the packet start within the first buffer.
    pub pkt_offset: u8,
    /// Taken from the packet's last completion.
    pub meta: RxMeta,
    pub descs: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RxOutcome {
    /// Nothing new on the completion ring.
    Empty,
    /// A packet is still being written; `descs` of its completions have
    /// been consumed so far.
    Pending { descs: u16 },
    Packet(RxCompletedPacket),
}

/// Reassembles multi-descriptor packets from an RX completion ring.
#[derive(Clone, Copy, Debug)]
pub struct RxEngine {
    max_rx_bufs: u16,
    req_id_limit: u16,
    check_mbz: bool,
}

impl RxEngine {
    /// `req_id_limit` is the depth of the submission queue the request ids
    /// index. `check_mbz` enables rejecting must-be-zero status bits.
    pub fn new(max_rx_bufs: u16, req_id_limit: u16, check_mbz: bool) -> Self {
        Self {
            max_rx_bufs,
            req_id_limit,
            check_mbz,
        }
    }

    pub fn max_rx_bufs(&self) -> u16 {
        self.max_rx_bufs
    }

    /// Consume the completions of at most one packet.
    ///
    /// An incomplete packet keeps its progress in the queue's partial state
    /// and is resumed by the next call.
    pub fn receive_one<M: DeviceMem>(&self, cq: &mut CompletionQueue<M>) -> Result<RxOutcome> {
        let partial = cq.partial();
        let mut count = partial.count;
        let start = if count == 0 { cq.head() } else { partial.start };
        let mut complete = false;

        while let Some(cdesc) = cq.peek_rx()? {
            let flags = cdesc.flags();
            if flags.contains(RxStatus::FIRST) && count > 0 {
                error!(
                    head = cq.head(),
                    pending = count,
                    "RX completion opens a packet while another is incomplete"
                );
                return Err(QueueError::UnexpectedFirstFlag {
                    head: cq.head(),
                    pending: count,
                });
            }

            if self.check_mbz && cdesc.mbz_bits() != 0 {
                error!(
                    head = cq.head(),
                    status = cdesc.status(),
                    "RX completion has must-be-zero bits set"
                );
                return Err(QueueError::ReservedBitsSet {
                    status: cdesc.status(),
                });
            }

            cq.advance_head(1);
            count += 1;

            if count > self.max_rx_bufs {
                error!(count, max = self.max_rx_bufs, "RX packet spans too many descriptors");
                cq.set_partial(PartialPacket::default());
                return Err(QueueError::TooManyRxDescs {
                    count,
                    max: self.max_rx_bufs,
                });
            }

            if flags.contains(RxStatus::LAST) {
                complete = true;
                break;
            }
        }

        if !complete {
            cq.set_partial(PartialPacket { count, start });
            return Ok(if count == 0 {
                RxOutcome::Empty
            } else {
                RxOutcome::Pending { descs: count }
            });
        }
        cq.set_partial(PartialPacket::default());

        let mut bufs = SmallVec::with_capacity(count as usize);
        let mut last = RxCompletion::default();
        for i in 0..count {
            let cdesc = cq.read_rx_at(start.wrapping_add(i))?;
            let req_id = cdesc.req_id();
            if req_id >= self.req_id_limit {
                error!(req_id, depth = self.req_id_limit, "RX completion request id out of range");
                return Err(QueueError::InvalidRequestId {
                    dir: Direction::Rx,
                    req_id,
                    depth: self.req_id_limit,
                });
            }
            bufs.push(RxBufInfo {
                req_id,
                len: cdesc.length(),
            });
            last = cdesc;
        }

        let pkt_offset = cq.read_rx_at(start)?.offset();
        let last_counter = start.wrapping_add(count - 1);
        let timestamp = cq.read_timestamp_at(last_counter)?;

        Ok(RxOutcome::Packet(RxCompletedPacket {
            bufs,
            pkt_offset,
            meta: RxMeta::from_completion(&last, timestamp),
            descs: count,
        }))
    }
}
