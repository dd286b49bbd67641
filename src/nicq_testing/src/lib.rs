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

// This crate contains testing utilities which need to be shared across multiple
// crates in this project.

pub mod alloc;
pub mod device;
pub mod doorbell;
pub mod mem;
pub mod simplelogger;

pub use alloc::{FakeAllocator, FakeMapper};
pub use device::{CqWriter, SqView};
pub use doorbell::RecordingDoorbell;
pub use mem::{FakeMem, FakeMemError};
