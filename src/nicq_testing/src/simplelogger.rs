use std::sync::{Mutex, Once};
use std::thread::current;

use log::{Level, Log, Metadata, Record, set_logger, set_max_level};

pub static LOGGER: SimpleLogger = SimpleLogger {};
static INITLOGGER: Once = Once::new();

/// Only records from the nicq crates are captured.
const TARGET_PREFIX: &str = "nicq";

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct LogCall {
    pub level: Level,
    pub args: String,
    pub target: String,
    pub line: Option<u32>,
    pub file: Option<String>,
    pub module_path: Option<String>,
}

static LOGCALLS: Mutex<Vec<LogCall>> = Mutex::new(Vec::new());

pub struct SimpleLogger {}

impl SimpleLogger {
    pub fn initialize_test_logger() {
        INITLOGGER.call_once(|| {
            set_logger(&LOGGER).unwrap();
            set_max_level(log::LevelFilter::Trace);
        });
    }

    pub fn num_log_calls(&self) -> usize {
        LOGCALLS.lock().unwrap().len()
    }

    pub fn get_log_call(&self, idx: usize) -> Option<LogCall> {
        LOGCALLS.lock().unwrap().get(idx).cloned()
    }

    pub fn clear_log_calls(&self) {
        LOGCALLS.lock().unwrap().clear();
    }

    /// True if any captured record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        LOGCALLS
            .lock()
            .unwrap()
            .iter()
            .any(|call| call.level == level && call.args.contains(needle))
    }

    pub fn test_log_records<F: Fn(&Vec<LogCall>)>(&self, f: F) {
        let logcalls = LOGCALLS.lock().unwrap();
        f(&logcalls);
        drop(logcalls);
        self.clear_log_calls();
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(TARGET_PREFIX) && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut logcalls = LOGCALLS.lock().unwrap();
        logcalls.push(LogCall {
            level: record.level(),
            args: format!("{}", record.args()),
            target: record.target().to_string(),
            line: record.line(),
            file: record.file().map(|file| file.to_string()),
            module_path: record
                .module_path()
                .map(|module_path| module_path.to_string()),
        });

        println!("Thread {:?} {:?}", current().id(), record);
    }

    fn flush(&self) {}
}
