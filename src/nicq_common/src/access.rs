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

//! Device Memory Access
//!
//! Rings live either in host memory the device reads through DMA, or in
//! device memory mapped into the driver's address space (push mode). The
//! [`DeviceMem`] trait hides that difference from the ring code so the same
//! ring logic runs against real mappings and against the fake device used
//! in tests.

use bytemuck::Pod;

/// Backend-provided access to ring memory.
///
/// Addresses are opaque 64-bit values understood by the backend. The ring
/// only ever computes `base + index * slot_size` from the base it was given.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Addresses handed to the ring stay valid for the ring's lifetime
/// - Acquire and release semantics are honoured as documented
/// - Reads and writes are free of undefined behaviour (alignment, validity)
pub trait DeviceMem {
    type Error;

    /// Read bytes from ring memory.
    ///
    /// # Returns
    ///
    /// Number of bytes actually read (should equal `dst.len()` on success).
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write bytes to ring memory.
    ///
    /// # Returns
    ///
    /// Number of bytes actually written (should equal `src.len()` on success).
    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error>;

    /// Load the 32-bit word at `addr` with acquire semantics.
    ///
    /// The value is returned exactly as a native load would see it. Every
    /// descriptor this device uses keeps its phase bit in the first word,
    /// so this is the synchronisation point for consuming completions.
    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error>;

    /// Store a 32-bit word at `addr` with release semantics.
    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error>;

    /// Read a Pod type at the given address.
    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(addr, bytes)?;
        Ok(val)
    }

    /// Write a Pod type at the given address.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(addr, bytes)?;
        Ok(())
    }

    /// Copy whole 64-bit words to `addr`.
    ///
    /// Push-mode lines are written to device memory with 64-bit stores so
    /// the write-combining buffer sees full words. `addr` must be 8-byte
    /// aligned.
    fn copy_words(&self, addr: u64, words: &[u64]) -> Result<(), Self::Error> {
        for (i, word) in words.iter().enumerate() {
            self.write_val(addr + (i * 8) as u64, *word)?;
        }
        Ok(())
    }
}
