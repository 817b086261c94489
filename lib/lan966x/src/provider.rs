// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Providers allow the engine to run in different contexts by letting
//! implementations of core services be plugged in. Logging is the
//! only one: the rule compiler and the FDMA channels log through a
//! provider, and the consumer decides where those messages go (stdout
//! in a unit test, `slog` in `vcapadm`, a capture buffer when a test
//! wants to assert on what was logged).

use crate::ddi::sync::KMutex;
use core::fmt;
use core::fmt::Display;
use std::string::String;
use std::string::ToString;
use std::vec::Vec;

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Keep every message in memory.
#[derive(Default)]
pub struct CaptureLog {
    msgs: KMutex<Vec<(LogLevel, String)>>,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every message logged so far.
    pub fn take(&self) -> Vec<(LogLevel, String)> {
        core::mem::take(&mut *self.msgs.lock())
    }

    /// Was a message containing `needle` logged at `level`?
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.msgs
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().push((level, msg.to_string()));
    }
}

// A shared capture can be handed to an `ExecCtx` while the test keeps
// its own reference.
impl<T: LogProvider> LogProvider for std::sync::Arc<T> {
    fn log(&self, level: LogLevel, msg: &str) {
        (**self).log(level, msg)
    }
}
