// SPDX-License-Identifier: GPL-2.0-or-later

//! Injectable logging capability.
//!
//! The muxer and demuxer never reach for a process-global logger; callers
//! hand them an `ArcLogger` the same way the host application hands its
//! media pipeline a logger instead of calling `tracing`/`log` macros from
//! deep inside library code.

use std::sync::Arc;

pub type ArcLogger = Arc<dyn ILogger + Send + Sync>;

pub trait ILogger {
    fn log(&self, entry: LogEntry);
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: &'static str,
    pub message: String,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, source: &'static str, message: String) -> Self {
        Self {
            level,
            source,
            message,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

/// No-op logger for callers that don't care, and for tests.
pub struct NullLogger;

impl ILogger for NullLogger {
    fn log(&self, _: LogEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_logger_accepts_everything() {
        let logger = NullLogger;
        logger.log(LogEntry::new(LogLevel::Debug, "test", "hello".to_owned()));
    }
}
