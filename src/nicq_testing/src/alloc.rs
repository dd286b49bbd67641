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

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use nicq_common::{BufferAllocator, DmaMapper, MappedRegion, MappingError, NumaNode};

/// Device address range handed out by [`FakeAllocator`].
const RX_IOVA_BASE: u64 = 0x0000_7000_0000_0000;

#[derive(Default)]
struct AllocState {
    live: HashMap<u64, MappedRegion>,
    allocs: usize,
    frees: usize,
    double_frees: usize,
}

/// Receive buffer allocator that tracks every live region.
///
/// New regions are placed on the node set with [`set_node`](Self::set_node),
/// which lets tests move "memory" between NUMA nodes.
#[derive(Default)]
pub struct FakeAllocator {
    state: Mutex<AllocState>,
    next_handle: AtomicU64,
    node: AtomicU16,
    fail: AtomicBool,
}

impl FakeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_node(&self, node: NumaNode) {
        self.node.store(node.0, Ordering::Relaxed);
    }

    /// Make every following allocation fail until reset.
    pub fn fail_allocations(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn allocs(&self) -> usize {
        self.state.lock().unwrap().allocs
    }

    pub fn frees(&self) -> usize {
        self.state.lock().unwrap().frees
    }

    pub fn double_frees(&self) -> usize {
        self.state.lock().unwrap().double_frees
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn is_live(&self, handle: u64) -> bool {
        self.state.lock().unwrap().live.contains_key(&handle)
    }
}

impl BufferAllocator for FakeAllocator {
    fn alloc_mapped(&self, len: u32, node: NumaNode) -> Result<MappedRegion, MappingError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(MappingError::OutOfMemory);
        }

        // The requested node is only a preference; the fake places memory
        // wherever `set_node` says.
        let _ = node;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let region = MappedRegion {
            handle,
            device_addr: RX_IOVA_BASE + handle * 0x1_0000,
            len,
            node: NumaNode(self.node.load(Ordering::Relaxed)),
        };

        let mut state = self.state.lock().unwrap();
        state.allocs += 1;
        state.live.insert(handle, region);
        Ok(region)
    }

    fn unmap_free(&self, region: MappedRegion) {
        let mut state = self.state.lock().unwrap();
        if state.live.remove(&region.handle).is_some() {
            state.frees += 1;
        } else {
            state.double_frees += 1;
        }
    }
}

#[derive(Default)]
struct MapState {
    live: HashSet<(u64, u32)>,
    maps: usize,
    unmaps: usize,
    fail_after: Option<usize>,
}

/// Identity DMA mapper that tracks live mappings.
#[derive(Default)]
pub struct FakeMapper {
    state: Mutex<MapState>,
}

impl FakeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more mappings succeed, then fail every following one.
    pub fn fail_after(&self, n: usize) {
        self.state.lock().unwrap().fail_after = Some(n);
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn maps(&self) -> usize {
        self.state.lock().unwrap().maps
    }

    pub fn unmaps(&self) -> usize {
        self.state.lock().unwrap().unmaps
    }
}

impl DmaMapper for FakeMapper {
    fn map(&self, addr: u64, len: u32) -> Result<u64, MappingError> {
        let mut state = self.state.lock().unwrap();
        if let Some(left) = state.fail_after.as_mut() {
            if *left == 0 {
                return Err(MappingError::MapFailed { addr, len });
            }
            *left -= 1;
        }

        state.maps += 1;
        state.live.insert((addr, len));
        Ok(addr)
    }

    fn unmap(&self, device_addr: u64, len: u32) {
        let mut state = self.state.lock().unwrap();
        state.unmaps += 1;
        state.live.remove(&(device_addr, len));
    }
}
