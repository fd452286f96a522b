//! `log` backend writing to the VGA console.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::kprintln;

/// Default maximum level; `verbose-boot` raises it to `Trace`.
#[cfg(feature = "verbose-boot")]
pub const MAX_LEVEL: LevelFilter = LevelFilter::Trace;
#[cfg(not(feature = "verbose-boot"))]
pub const MAX_LEVEL: LevelFilter = LevelFilter::Info;

pub struct ConsoleLogger {
    max_level: LevelFilter,
}

impl ConsoleLogger {
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        kprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger::new(MAX_LEVEL);

/// Install the console logger. Call once, after the console is up.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(MAX_LEVEL);
    Ok(())
}
