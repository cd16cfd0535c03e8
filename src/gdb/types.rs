//! Shared data model for the dispatch layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A breakpoint as reported by `info breakpoints`.
///
/// This is a cached view; the debugger stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub num: u32,
    pub file: String,
    pub line: u32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Outcome of validating one piece of user input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationResult {
    pub fn ok(normalized: impl Into<String>) -> Self {
        Self {
            valid: true,
            normalized: Some(normalized.into()),
            error: None,
            hint: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            normalized: None,
            error: Some(error.into()),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }
}

/// Scheduling priority of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    /// Queued ahead of pending normal requests. Never preempts the one in flight.
    High,
}

/// Per-request options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Falls back to `GdbConfig::timeout_ms` when unset.
    pub timeout: Option<Duration>,
    pub priority: Priority,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn high_priority() -> Self {
        Self {
            priority: Priority::High,
            ..Default::default()
        }
    }
}

/// Read-only view of the dispatcher resource table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub outstanding: usize,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub rejected: u64,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

/// Display format of a memory view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryFormat {
    #[default]
    Hex,
}

impl MemoryFormat {
    /// Unit letter used in `x/<n><fmt>b`
    pub fn gdb_letter(&self) -> char {
        match self {
            MemoryFormat::Hex => 'x',
        }
    }
}

impl std::fmt::Display for MemoryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryFormat::Hex => write!(f, "hex"),
        }
    }
}

/// State of the active memory view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryViewState {
    pub base_address: u64,
    pub size_bytes: usize,
    pub bytes_per_line: usize,
    pub format: MemoryFormat,
}

/// Bytes read back from `x/<n>xb`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDump {
    pub address: u64,
    pub bytes: Vec<u8>,
}

/// Severity passed to the notification sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Target of a memory view edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    /// A variable name or lvalue expression, written with `set variable`.
    Variable(String),
    /// An address (literal or symbolic) written byte by byte.
    Address(String),
}

/// A byte that could not be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteWriteFailure {
    pub address: u64,
    pub error: String,
}

/// Result of an edit that reached the debugger.
///
/// Byte writes are not atomic: a failed byte does not undo the ones before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EditOutcome {
    Complete { written: usize },
    Partial { written: usize, failed: Vec<ByteWriteFailure> },
}

impl EditOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, EditOutcome::Complete { .. })
    }
}

/// Value produced by the evaluate session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub expression: String,
    pub value: String,
    /// `$N` value-history slot, when gdb reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_index: Option<u32>,
}

/// GDB configuration
#[derive(Debug, Clone)]
pub struct GdbConfig {
    pub gdb_path: String,
    pub gdb_args: Vec<String>,
    pub prompt: String,
    pub timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub bytes_per_line: usize,
    pub default_view_bytes: usize,
    pub max_view_bytes: usize,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdb_args: vec!["--quiet".to_string(), "--nx".to_string()],
            prompt: "(gdb) ".to_string(),
            timeout_ms: 5000,
            startup_timeout_ms: 10000,
            bytes_per_line: 16,
            default_view_bytes: 256,
            max_view_bytes: 4096,
        }
    }
}

impl GdbConfig {
    /// Defaults overlaid with `GDB_DISPATCH_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup("GDB_DISPATCH_GDB").filter(|p| !p.trim().is_empty()) {
            config.gdb_path = path;
        }
        if let Some(ms) = lookup("GDB_DISPATCH_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            config.timeout_ms = ms;
        }
        if let Some(prompt) = lookup("GDB_DISPATCH_PROMPT").filter(|p| !p.is_empty()) {
            config.prompt = prompt;
        }
        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("GDB_DISPATCH_GDB", "gdb-multiarch"),
            ("GDB_DISPATCH_TIMEOUT_MS", "250"),
        ]
        .into_iter()
        .collect();
        let config = GdbConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.gdb_path, "gdb-multiarch");
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.prompt, "(gdb) ");
    }

    #[test]
    fn test_config_ignores_garbage_timeout() {
        let config = GdbConfig::from_lookup(|k| {
            (k == "GDB_DISPATCH_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_edit_outcome_serializes_status() {
        let outcome = EditOutcome::Partial {
            written: 1,
            failed: vec![ByteWriteFailure {
                address: 0x1001,
                error: "timeout".to_string(),
            }],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "partial");
        assert_eq!(json["failed"][0]["address"], 0x1001);
    }
}
