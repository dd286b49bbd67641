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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
// Arbitrary is only derived for fuzzing, which requires std
#![cfg_attr(not(any(test, feature = "std")), no_std)]

/// Memory access to descriptor rings shared with the device.
pub mod access;

/// DMA ordering barriers between the driver and the device.
pub mod barrier;

/// Binary descriptor and completion layouts, bit-exact with the device.
pub mod desc;

/// Collaborators the driver consumes: doorbells, DMA mapping, buffer
/// allocation and device capabilities.
pub mod device;

/// The phase-bit descriptor ring shared by submission and completion queues.
pub mod ring;

pub use access::DeviceMem;
pub use device::{
    BufferAllocator, DeviceCaps, DmaMapper, Doorbell, MappedRegion, MappingError, NumaNode,
};
pub use ring::{DescriptorRing, RingError, SubmitSlot};
