//! Breakpoint index
//!
//! A cache of the last `info breakpoints` table. gdb stays the authority:
//! every mutating command drops the cache, and toggling always re-reads the
//! table before deciding what to do.

use crate::gdb::dispatcher::Dispatcher;
use crate::gdb::error::BreakpointError;
use crate::gdb::parser::parse_breakpoint_created;
use crate::gdb::types::Breakpoint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use crate::gdb::parser::{find_breakpoint, parse_breakpoints};

/// What a toggle did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ToggleOutcome {
    Added { num: Option<u32> },
    Removed { num: u32 },
}

pub struct BreakpointIndex {
    dispatcher: Dispatcher,
    cache: Option<Vec<Breakpoint>>,
}

impl BreakpointIndex {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            cache: None,
        }
    }

    /// Last table read, if it has not been invalidated since
    pub fn cached(&self) -> Option<&[Breakpoint]> {
        self.cache.as_deref()
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Re-read the table from gdb
    pub async fn refresh(&mut self) -> Result<&[Breakpoint], BreakpointError> {
        let lines = self.dispatcher.request("info breakpoints", None).await?;
        let breakpoints = parse_breakpoints(&lines);
        debug!("Breakpoint index holds {} entries", breakpoints.len());
        Ok(self.cache.insert(breakpoints))
    }

    /// The table, read from gdb only when the cache is empty
    pub async fn breakpoints(&mut self) -> Result<Vec<Breakpoint>, BreakpointError> {
        if let Some(cached) = &self.cache {
            return Ok(cached.clone());
        }
        Ok(self.refresh().await?.to_vec())
    }

    /// Remove the breakpoint at `file:line`, or set one if there is none
    pub async fn toggle(&mut self, file: &str, line: u32) -> Result<ToggleOutcome, BreakpointError> {
        let file = file.trim();
        if file.is_empty() || file.contains(char::is_whitespace) {
            return Err(BreakpointError::Validation(format!("'{}' is not a file name", file)));
        }
        if line == 0 {
            return Err(BreakpointError::Validation("line numbers start at 1".to_string()));
        }

        let existing = find_breakpoint(self.refresh().await?, file, line);
        self.invalidate();

        match existing {
            Some(num) => {
                self.dispatcher.request(format!("delete {}", num), None).await?;
                info!("Removed breakpoint {} at {}:{}", num, file, line);
                Ok(ToggleOutcome::Removed { num })
            }
            None => {
                let lines = self
                    .dispatcher
                    .request(format!("break {}:{}", file, line), None)
                    .await?;
                let num = parse_breakpoint_created(&lines);
                info!("Set breakpoint {:?} at {}:{}", num, file, line);
                Ok(ToggleOutcome::Added { num })
            }
        }
    }

    pub async fn set_enabled(&mut self, num: u32, enabled: bool) -> Result<(), BreakpointError> {
        self.invalidate();
        let verb = if enabled { "enable" } else { "disable" };
        self.dispatcher.request(format!("{} {}", verb, num), None).await?;
        Ok(())
    }
}
