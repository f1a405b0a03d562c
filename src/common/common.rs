// SPDX-License-Identifier: GPL-2.0-or-later

pub mod buffer;
pub mod log;

pub use buffer::GrowableBuffer;
pub use log::{ArcLogger, ILogger, LogEntry, LogLevel, NullLogger};
