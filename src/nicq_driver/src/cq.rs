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

use nicq_common::desc::{RxCompletion, RxCompletionExt, TxCompletion};
use nicq_common::{DescriptorRing, DeviceMem};
use tracing::error;

use crate::error::{Direction, QueueError, Result};

/// Completion entry format of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionKind {
    Tx,
    Rx,
    /// RX completions carrying a timestamp.
    RxExtended,
}

impl CompletionKind {
    pub const fn entry_size(&self) -> usize {
        match self {
            CompletionKind::Tx => TxCompletion::SIZE,
            CompletionKind::Rx => RxCompletion::SIZE,
            CompletionKind::RxExtended => RxCompletionExt::SIZE,
        }
    }
}

/// An RX packet whose descriptors are only partly completed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartialPacket {
    /// Entries already consumed.
    pub count: u16,
    /// Counter of the packet's first entry.
    pub start: u16,
}

/// Consumer side of a completion ring.
pub struct CompletionQueue<M> {
    ring: DescriptorRing<M>,
    kind: CompletionKind,
    partial: PartialPacket,
}

impl<M: DeviceMem> CompletionQueue<M> {
    pub fn required_size(depth: u16, kind: CompletionKind) -> usize {
        DescriptorRing::<M>::required_size(depth, kind.entry_size())
    }

    pub fn new(mem: M, base: u64, depth: u16, kind: CompletionKind) -> Result<Self> {
        Ok(Self {
            ring: DescriptorRing::new(mem, base, depth, kind.entry_size())?,
            kind,
            partial: PartialPacket::default(),
        })
    }

    pub fn kind(&self) -> CompletionKind {
        self.kind
    }

    pub fn depth(&self) -> u16 {
        self.ring.depth()
    }

    pub fn head(&self) -> u16 {
        self.ring.head()
    }

    /// Phase expected on the next new entry.
    pub fn phase(&self) -> bool {
        self.ring.complete_phase()
    }

    /// Take the request id of the next TX completion.
    ///
    /// Returns `Ok(None)` when the device has not written the next entry.
    /// A request id beyond the queue depth is corruption; the head is left
    /// in place so nothing past it is consumed.
    pub fn try_take_request_id(&mut self) -> Result<Option<u16>> {
        let Some(cdesc) = self.ring.peek_next_complete::<TxCompletion>()? else {
            return Ok(None);
        };

        let req_id = cdesc.req_id();
        if req_id >= self.ring.depth() {
            error!(
                head = self.ring.head(),
                req_id,
                depth = self.ring.depth(),
                "TX completion request id out of range"
            );
            return Err(QueueError::InvalidRequestId {
                dir: Direction::Tx,
                req_id,
                depth: self.ring.depth(),
            });
        }

        self.ring.advance_head(1);
        Ok(Some(req_id))
    }

    /// The RX completion at the head, if written this lap.
    pub fn peek_rx(&self) -> Result<Option<RxCompletion>> {
        Ok(self.ring.peek_next_complete::<RxCompletion>()?)
    }

    /// Re-read an already consumed RX completion.
    pub fn read_rx_at(&self, counter: u16) -> Result<RxCompletion> {
        Ok(self.ring.read_at::<RxCompletion>(counter)?)
    }

    /// Timestamp of an already consumed RX completion, if the queue uses
    /// extended entries.
    pub fn read_timestamp_at(&self, counter: u16) -> Result<Option<u64>> {
        match self.kind {
            CompletionKind::RxExtended => Ok(Some(
                self.ring.read_at::<RxCompletionExt>(counter)?.timestamp(),
            )),
            CompletionKind::Tx | CompletionKind::Rx => Ok(None),
        }
    }

    pub fn advance_head(&mut self, n: u16) {
        self.ring.advance_head(n)
    }

    pub fn partial(&self) -> PartialPacket {
        self.partial
    }

    pub(crate) fn set_partial(&mut self, partial: PartialPacket) {
        self.partial = partial;
    }
}
