//! Leveled logger collaborator.
//!
//! Every component receives its logger explicitly. `TracingLogger` forwards to
//! `tracing`; `MemoryLogger` keeps the lines so callers can consume them.

use std::fmt;
use std::sync::Mutex;
use tracing::Level;

/// Leveled logger injected into the discovery engine
pub trait LeveledLogger: Send + Sync {
    /// Log a formatted message at `level`
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    /// Log at trace level
    fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::TRACE, args);
    }

    /// Log at debug level
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, args);
    }

    /// Log at info level
    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::INFO, args);
    }

    /// Log at warn level
    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::WARN, args);
    }

    /// Log at error level
    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::ERROR, args);
    }
}

/// Logger forwarding to the `tracing` macros
#[derive(Debug, Clone)]
pub struct TracingLogger {
    subsystem: String,
}

impl TracingLogger {
    /// Create a logger tagging every event with `subsystem`
    #[must_use]
    pub fn new(subsystem: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
        }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("nat")
    }
}

impl LeveledLogger for TracingLogger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let subsystem = self.subsystem.as_str();
        // tracing needs the level at compile time
        match level {
            Level::TRACE => tracing::trace!(target: "w3t_nat", subsystem, "{args}"),
            Level::DEBUG => tracing::debug!(target: "w3t_nat", subsystem, "{args}"),
            Level::INFO => tracing::info!(target: "w3t_nat", subsystem, "{args}"),
            Level::WARN => tracing::warn!(target: "w3t_nat", subsystem, "{args}"),
            _ => tracing::error!(target: "w3t_nat", subsystem, "{args}"),
        }
    }
}

/// Logger recording every line in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    /// Create an empty logger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded lines, oldest first
    #[must_use]
    pub fn lines(&self) -> Vec<(Level, String)> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Recorded messages containing `needle`
    #[must_use]
    pub fn find(&self, needle: &str) -> Vec<(Level, String)> {
        self.lines()
            .into_iter()
            .filter(|(_, line)| line.contains(needle))
            .collect()
    }
}

impl LeveledLogger for MemoryLogger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let line = args.to_string();
        match self.lines.lock() {
            Ok(mut lines) => lines.push((level, line)),
            Err(poisoned) => poisoned.into_inner().push((level, line)),
        }
    }
}
