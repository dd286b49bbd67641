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

use std::sync::{Arc, Mutex};

use nicq_common::Doorbell;

/// Doorbell register that records every value written to it.
#[derive(Clone, Debug, Default)]
pub struct RecordingDoorbell {
    writes: Arc<Mutex<Vec<u32>>>,
}

impl RecordingDoorbell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<u32> {
        self.writes.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<u32> {
        self.writes.lock().unwrap().last().copied()
    }
}

impl Doorbell for RecordingDoorbell {
    fn ring(&self, value: u32) {
        self.writes.lock().unwrap().push(value);
    }
}
