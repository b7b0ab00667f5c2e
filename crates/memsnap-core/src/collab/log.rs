use std::sync::Mutex;

use tracing::{error, warn};

/// Diagnostic channel consumed by the engine. Never fatal.
pub trait LogSink: Send + Sync {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn warn(&self, message: &str) {
        warn!(target: "memsnap", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "memsnap", "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warn,
    Error,
}

/// Keeps every message, for consumers that display them later.
#[derive(Debug, Default)]
pub struct CollectingLog {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl CollectingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.of_level(LogLevel::Warn)
    }

    pub fn errors(&self) -> Vec<String> {
        self.of_level(LogLevel::Error)
    }

    fn of_level(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    fn push(&self, level: LogLevel, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

impl LogSink for CollectingLog {
    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}
