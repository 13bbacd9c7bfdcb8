//! Replay-safe logging for orchestration code.
//!
//! Orchestration code runs again on every replay, so a plain `tracing::info!`
//! inside it would repeat once per turn. The context instead buffers
//! `(LogLevel, String)` pairs only while it is executing past the recorded
//! history; the runtime flushes that buffer through `tracing` after the turn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Emit buffered orchestration logs for one turn.
pub fn flush(instance: &str, turn_index: u64, logs: &[(LogLevel, String)]) {
    for (level, msg) in logs {
        match level {
            LogLevel::Error => error!(instance, turn_index, text = %msg, "orchestration trace"),
            LogLevel::Warn => warn!(instance, turn_index, text = %msg, "orchestration trace"),
            LogLevel::Info => info!(instance, turn_index, text = %msg, "orchestration trace"),
            LogLevel::Debug => debug!(instance, turn_index, text = %msg, "orchestration trace"),
        }
    }
}
