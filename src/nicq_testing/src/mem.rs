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

use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nicq_common::DeviceMem;

/// Error returned when an access falls outside the fake memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMemError {
    OutOfBounds { addr: u64, len: usize },
}

struct Inner {
    base: u64,
    bytes: Mutex<Vec<u8>>,
    /// Bump pointer for [`FakeMem::carve`].
    next_free: AtomicU64,
    word_copies: AtomicUsize,
}

/// Shared memory standing in for both host DMA memory and device-mapped
/// push-mode memory.
///
/// Clones share the same bytes, so the driver and the test's device model
/// can each hold one. Accesses are bounds checked and serialised by a
/// mutex, which also provides the ordering the acquire and release
/// operations promise.
#[derive(Clone)]
pub struct FakeMem {
    inner: Arc<Inner>,
}

impl FakeMem {
    pub const DEFAULT_BASE: u64 = 0x1000_0000;

    pub fn new(size: usize) -> Self {
        Self::with_base(Self::DEFAULT_BASE, size)
    }

    pub fn with_base(base: u64, size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                base,
                bytes: Mutex::new(vec![0u8; size]),
                next_free: AtomicU64::new(base),
                word_copies: AtomicUsize::new(0),
            }),
        }
    }

    pub fn base(&self) -> u64 {
        self.inner.base
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve `size` bytes aligned to 64 and return their address.
    pub fn carve(&self, size: usize) -> u64 {
        let size = (size as u64).next_multiple_of(64);
        let addr = self.inner.next_free.fetch_add(size, Ordering::Relaxed);
        assert!(
            addr + size <= self.base() + self.len() as u64,
            "fake memory exhausted carving {size} bytes"
        );
        addr
    }

    /// Copy out `len` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        let range = self.range(addr, len).unwrap();
        self.inner.bytes.lock().unwrap()[range].to_vec()
    }

    pub fn fill(&self, addr: u64, len: usize, byte: u8) {
        let range = self.range(addr, len).unwrap();
        self.inner.bytes.lock().unwrap()[range].fill(byte);
    }

    /// Number of [`DeviceMem::copy_words`] calls, one per pushed line.
    pub fn word_copies(&self) -> usize {
        self.inner.word_copies.load(Ordering::Relaxed)
    }

    fn range(&self, addr: u64, len: usize) -> Result<Range<usize>, FakeMemError> {
        let oob = FakeMemError::OutOfBounds { addr, len };
        let start = addr.checked_sub(self.inner.base).ok_or(oob)? as usize;
        let end = start.checked_add(len).ok_or(oob)?;
        if end > self.len() {
            return Err(oob);
        }
        Ok(start..end)
    }
}

impl DeviceMem for FakeMem {
    type Error = FakeMemError;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let range = self.range(addr, dst.len())?;
        dst.copy_from_slice(&self.inner.bytes.lock().unwrap()[range]);
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        let range = self.range(addr, src.len())?;
        self.inner.bytes.lock().unwrap()[range].copy_from_slice(src);
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_ne_bytes(word))
    }

    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error> {
        self.write(addr, &val.to_ne_bytes())?;
        Ok(())
    }

    fn copy_words(&self, addr: u64, words: &[u64]) -> Result<(), Self::Error> {
        if addr % 8 != 0 {
            return Err(FakeMemError::OutOfBounds {
                addr,
                len: words.len() * 8,
            });
        }
        self.write(addr, bytemuck::cast_slice(words))?;
        self.inner.word_copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
