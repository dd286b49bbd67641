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

// Logs are captured process wide, so this file holds a single test.

use log::Level;
use nicq_common::DeviceCaps;
use nicq_common::desc::{RxCompletion, RxStatus};
use nicq_driver::{DeviceFault, QueueError};
use nicq_testing::simplelogger::{LOGGER, SimpleLogger};

pub mod common;
use common::{harness, small_config};

#[test]
fn errors_are_logged_through_the_log_facade() {
    SimpleLogger::initialize_test_logger();
    LOGGER.clear_log_calls();

    let mut h = harness(&small_config(), DeviceCaps::empty(), DeviceFault::new());
    assert!(LOGGER.contains(Level::Info, "queue pair ready"));

    h.rx_device.post_rx(RxCompletion::new(RxStatus::FIRST, 2048, 0));
    h.rx_device.post_rx(RxCompletion::new(RxStatus::FIRST | RxStatus::LAST, 60, 1));
    assert!(matches!(
        h.poll(),
        Err(QueueError::UnexpectedFirstFlag { head: 1, pending: 1 })
    ));

    LOGGER.test_log_records(|calls| {
        let first_flag = calls
            .iter()
            .position(|c| c.level == Level::Error && c.args.contains("opens a packet"))
            .unwrap();
        let reset = calls
            .iter()
            .position(|c| c.level == Level::Error && c.args.contains("device needs reset"))
            .unwrap();
        assert!(first_flag < reset);
        assert!(calls.iter().all(|c| c.target.starts_with("nicq")));
    });

    // A second fatal error only warns.
    h.fault.trigger(nicq_driver::ResetReason::TooManyRxDescs);
    assert!(LOGGER.contains(Level::Warn, "device reset already pending"));
}
