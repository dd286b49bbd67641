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

use std::cmp::{max, min};

use nicq_common::ring::MAX_DEPTH;
use tracing::{Span, instrument};

/// Where TX descriptors live.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Placement {
    /// Descriptors in host memory, fetched by the device.
    #[default]
    Host,
    /// Descriptors and packet headers pushed into device memory (LLQ).
    Device,
}

/// Layout of push-mode lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LlqConfig {
    line_size: u16,
    descs_before_header: u8,
}

impl LlqConfig {
    /// The default line size in bytes
    pub const DEFAULT_LINE_SIZE: u16 = 128;
    /// The smallest line the device supports
    pub const MIN_LINE_SIZE: u16 = 64;
    /// The largest line the device supports
    pub const MAX_LINE_SIZE: u16 = 256;
    /// The default number of descriptors placed before the header
    pub const DEFAULT_DESCS_BEFORE_HEADER: u8 = 2;

    /// Set the line size, rounded to a power of two within
    /// `MIN_LINE_SIZE..=MAX_LINE_SIZE`.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_line_size(&mut self, line_size: u16) {
        self.line_size = min(
            Self::MAX_LINE_SIZE,
            max(
                line_size
                    .checked_next_power_of_two()
                    .unwrap_or(Self::MAX_LINE_SIZE),
                Self::MIN_LINE_SIZE,
            ),
        );
        self.clamp_descs_before_header();
    }

    /// Set how many descriptors precede the header in the first line of a
    /// packet. At least one descriptor always comes first and room is left
    /// for a header.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_descs_before_header(&mut self, descs: u8) {
        self.descs_before_header = descs;
        self.clamp_descs_before_header();
    }

    fn clamp_descs_before_header(&mut self) {
        let limit = (self.descs_per_line() - 1) as u8;
        self.descs_before_header = min(limit, max(self.descs_before_header, 1));
    }

    pub fn line_size(&self) -> u16 {
        self.line_size
    }

    pub fn descs_before_header(&self) -> u8 {
        self.descs_before_header
    }

    /// Descriptors that fit a line with no header.
    pub fn descs_per_line(&self) -> u16 {
        self.line_size / nicq_common::desc::TxDesc::SIZE as u16
    }

    /// Byte offset of the header within the first line of a packet.
    pub fn header_offset(&self) -> usize {
        self.descs_before_header as usize * nicq_common::desc::TxDesc::SIZE
    }
}

impl Default for LlqConfig {
    fn default() -> Self {
        Self {
            line_size: Self::DEFAULT_LINE_SIZE,
            descs_before_header: Self::DEFAULT_DESCS_BEFORE_HEADER,
        }
    }
}

/// The configuration of one queue pair
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueConfig {
    tx_depth: u16,
    rx_depth: u16,
    placement: Placement,
    llq: LlqConfig,
    /// Push-mode lines the device accepts per doorbell, when it enforces a limit.
    max_burst: u16,
    meta_caching: bool,
    max_tx_sgl: u16,
    max_rx_sgl: u16,
    max_tx_header_size: u16,
    rx_buf_size: u32,
    refill_divider: u16,
    refill_max: u16,
    lpc_multiplier: u8,
}

impl QueueConfig {
    /// The default ring depth
    pub const DEFAULT_DEPTH: u16 = 1024;
    /// The minimum ring depth
    pub const MIN_DEPTH: u16 = 2;
    /// The maximum ring depth
    pub const MAX_DEPTH: u16 = MAX_DEPTH;
    /// The default push-mode burst, in lines
    pub const DEFAULT_MAX_BURST: u16 = 16;
    /// The default maximum number of buffers in a TX packet
    pub const DEFAULT_MAX_TX_SGL: u16 = 17;
    /// The default maximum number of buffers in an RX packet
    pub const DEFAULT_MAX_RX_SGL: u16 = 16;
    /// The default maximum push header size in bytes
    pub const DEFAULT_MAX_TX_HEADER_SIZE: u16 = 96;
    /// The default receive buffer size in bytes
    pub const DEFAULT_RX_BUF_SIZE: u32 = 4096;
    /// The minimum receive buffer size in bytes
    pub const MIN_RX_BUF_SIZE: u32 = 256;
    /// The maximum receive buffer size the 16-bit length field can describe
    pub const MAX_RX_BUF_SIZE: u32 = u16::MAX as u32;
    /// RX is refilled once `depth / DEFAULT_REFILL_DIVIDER` slots are free
    pub const DEFAULT_REFILL_DIVIDER: u16 = 8;
    /// Upper bound for the refill threshold
    pub const DEFAULT_REFILL_MAX: u16 = 256;
    /// The default local buffer cache multiplier, 0 disables the cache
    pub const DEFAULT_LPC_MULTIPLIER: u8 = 2;
    /// The maximum local buffer cache multiplier
    pub const MAX_LPC_MULTIPLIER: u8 = 32;

    fn clamp_depth(depth: u16) -> u16 {
        match depth {
            0 => Self::DEFAULT_DEPTH,
            1.. => min(
                Self::MAX_DEPTH,
                max(
                    depth
                        .checked_next_power_of_two()
                        .unwrap_or(Self::MAX_DEPTH),
                    Self::MIN_DEPTH,
                ),
            ),
        }
    }

    /// Set the TX ring depth. 0 selects `DEFAULT_DEPTH`; other values are
    /// rounded up to a power of two within `MIN_DEPTH..=MAX_DEPTH`.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_tx_depth(&mut self, depth: u16) {
        self.tx_depth = Self::clamp_depth(depth);
    }

    /// Set the RX ring depth with the same rules as [`set_tx_depth`](Self::set_tx_depth).
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_rx_depth(&mut self, depth: u16) {
        self.rx_depth = Self::clamp_depth(depth);
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_llq(&mut self, llq: LlqConfig) {
        self.llq = llq;
    }

    /// Set the push-mode burst in lines, used when the device enforces one.
    /// 0 selects `DEFAULT_MAX_BURST`.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_max_burst(&mut self, lines: u16) {
        self.max_burst = match lines {
            0 => Self::DEFAULT_MAX_BURST,
            1.. => lines,
        };
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_meta_caching(&mut self, enabled: bool) {
        self.meta_caching = enabled;
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_max_tx_sgl(&mut self, max_sgl: u16) {
        self.max_tx_sgl = max(max_sgl, 1);
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_max_rx_sgl(&mut self, max_sgl: u16) {
        self.max_rx_sgl = max(max_sgl, 1);
    }

    /// Set the largest header accepted in push mode, bounded by the 8-bit
    /// header length field.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_max_tx_header_size(&mut self, size: u16) {
        self.max_tx_header_size = min(size, u8::MAX as u16);
    }

    /// Set the receive buffer size. 0 selects `DEFAULT_RX_BUF_SIZE`.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_rx_buf_size(&mut self, size: u32) {
        self.rx_buf_size = match size {
            0 => Self::DEFAULT_RX_BUF_SIZE,
            1.. => min(Self::MAX_RX_BUF_SIZE, max(size, Self::MIN_RX_BUF_SIZE)),
        };
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_refill_threshold(&mut self, divider: u16, max_threshold: u16) {
        self.refill_divider = max(divider, 1);
        self.refill_max = max(max_threshold, 1);
    }

    /// Set the local buffer cache multiplier, capped at `MAX_LPC_MULTIPLIER`.
    /// 0 disables the cache.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_lpc_multiplier(&mut self, multiplier: u8) {
        self.lpc_multiplier = min(multiplier, Self::MAX_LPC_MULTIPLIER);
    }

    pub fn tx_depth(&self) -> u16 {
        self.tx_depth
    }

    pub fn rx_depth(&self) -> u16 {
        self.rx_depth
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn llq(&self) -> &LlqConfig {
        &self.llq
    }

    pub fn max_burst(&self) -> u16 {
        self.max_burst
    }

    pub fn meta_caching(&self) -> bool {
        self.meta_caching
    }

    pub fn max_tx_sgl(&self) -> u16 {
        self.max_tx_sgl
    }

    pub fn max_rx_sgl(&self) -> u16 {
        self.max_rx_sgl
    }

    pub fn max_tx_header_size(&self) -> u16 {
        self.max_tx_header_size
    }

    pub fn rx_buf_size(&self) -> u32 {
        self.rx_buf_size
    }

    pub fn lpc_multiplier(&self) -> u8 {
        self.lpc_multiplier
    }

    /// Free RX slots that trigger a refill.
    pub fn refill_threshold(&self) -> u16 {
        max(min(self.rx_depth / self.refill_divider, self.refill_max), 1)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tx_depth: Self::DEFAULT_DEPTH,
            rx_depth: Self::DEFAULT_DEPTH,
            placement: Placement::Host,
            llq: LlqConfig::default(),
            max_burst: Self::DEFAULT_MAX_BURST,
            meta_caching: true,
            max_tx_sgl: Self::DEFAULT_MAX_TX_SGL,
            max_rx_sgl: Self::DEFAULT_MAX_RX_SGL,
            max_tx_header_size: Self::DEFAULT_MAX_TX_HEADER_SIZE,
            rx_buf_size: Self::DEFAULT_RX_BUF_SIZE,
            refill_divider: Self::DEFAULT_REFILL_DIVIDER,
            refill_max: Self::DEFAULT_REFILL_MAX,
            lpc_multiplier: Self::DEFAULT_LPC_MULTIPLIER,
        }
    }
}
