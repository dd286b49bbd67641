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
use thiserror::Error;

bitflags! {
    /// Capabilities negotiated with the device at queue setup.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u32 {
        /// RX completions are 32 bytes and carry a timestamp.
        const EXTENDED_RX_CDESC = 1 << 0;
        /// Push-mode queues enforce a per-doorbell burst limit.
        const LLQ_MAX_BURST     = 1 << 1;
        /// The device leaves reserved completion bits clear, so set ones
        /// indicate corruption.
        const CDESC_MBZ         = 1 << 2;
        /// Push (low latency) placement is available.
        const LLQ               = 1 << 3;
        /// The device keeps TX metadata across packets (`META_STORE`).
        const META_CACHING      = 1 << 4;
    }
}

/// NUMA node a buffer's backing memory lives on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NumaNode(pub u16);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    #[error("Out of memory")]
    OutOfMemory,
    #[error("DMA mapping of {len} bytes at {addr:#x} failed")]
    MapFailed { addr: u64, len: u32 },
}

/// A receive buffer allocated and mapped for device access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MappedRegion {
    /// Allocator-defined handle used to free the buffer.
    pub handle: u64,
    /// Address the device writes to.
    pub device_addr: u64,
    pub len: u32,
    pub node: NumaNode,
}

/// Write a 32-bit value to a queue's doorbell register.
pub trait Doorbell {
    fn ring(&self, value: u32);
}

/// Maps packet memory for device reads.
pub trait DmaMapper: Send + Sync {
    /// Map `len` bytes at host address `addr`, returning the device address.
    fn map(&self, addr: u64, len: u32) -> Result<u64, MappingError>;

    fn unmap(&self, device_addr: u64, len: u32);
}

/// Allocates receive buffers together with their device mapping.
pub trait BufferAllocator: Send + Sync {
    /// Allocate and map `len` bytes, preferring memory on `node`.
    fn alloc_mapped(&self, len: u32, node: NumaNode) -> Result<MappedRegion, MappingError>;

    /// Unmap and free a region returned by [`alloc_mapped`](Self::alloc_mapped).
    fn unmap_free(&self, region: MappedRegion);
}
