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

use core::sync::atomic::{Ordering, fence};

/// Order descriptor payload writes before the write that publishes them
/// (tail update, doorbell or push-mode line copy).
#[inline(always)]
pub fn dma_wmb() {
    fence(Ordering::Release);
}

/// Order the phase-bit observation before reads of the rest of a
/// completion entry.
#[inline(always)]
pub fn dma_rmb() {
    fence(Ordering::Acquire);
}

/// Full barrier before writing a register or device-mapped line.
#[inline(always)]
pub fn wmb() {
    fence(Ordering::SeqCst);
}
