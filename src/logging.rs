//! Logger setup for the front ends.
//!
//! `env_logger` does filtering and formatting (set `RUST_LOG=debug` for
//! navigation traces). When a console writer is given, every accepted record
//! is also copied into it so log lines show up next to task output.
//!
//! Messages the session already writes to the console themselves are logged
//! under [`REPORTED`]; the copy skips those so each shows up once.

use std::io::Write as _;

use log::{Log, Metadata, Record};

use crate::output::OutputWriter;

/// Log target for records whose text was already written to the console.
pub const REPORTED: &str = "songscope::reported";

struct ConsoleLogger {
    inner: env_logger::Logger,
    console: Option<OutputWriter>,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        if record.target() == REPORTED {
            return;
        }
        if let Some(console) = &self.console {
            let mut console = console.clone();
            let _ = writeln!(console, "{:<5} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the process logger. Safe to call more than once; later calls are
/// ignored by the `log` crate.
pub fn init(console: Option<OutputWriter>) {
    let inner = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .build();
    let max_level = inner.filter();
    if log::set_boxed_logger(Box::new(ConsoleLogger { inner, console })).is_ok() {
        log::set_max_level(max_level);
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
