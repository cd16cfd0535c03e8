//! Memory view state machine
//!
//! `Inactive` until the first successful [`MemoryView::show`], then `Active`
//! over one base address. Every transition goes through the dispatcher and
//! re-renders the view buffer. State only changes once the response for a
//! transition has landed, so a read taken while a request is in flight sees
//! the previous page.
//!
//! Failures never propagate as panics: each one is reported through the
//! notifier and returned as a [`MemoryViewError`].

use crate::gdb::dispatcher::{Dispatcher, PendingResponse};
use crate::gdb::error::{DispatchError, MemoryViewError};
use crate::gdb::host::{BufferHandle, Notifier, ViewHost};
use crate::gdb::parser::{extract_address, parse_memory_dump};
use crate::gdb::types::{
    ByteWriteFailure, EditOutcome, EditTarget, GdbConfig, MemoryDump, MemoryFormat, MemoryViewState, Severity,
};
use crate::gdb::validate::{parse_address_literal, validate_input, InputKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BUFFER_TITLE: &str = "GDB Memory";

/// Run `value` through the validator, returning the normalized text
fn validated(kind: InputKind, value: &str) -> Result<String, MemoryViewError> {
    let result = validate_input(kind.as_str(), value);
    match (result.valid, result.normalized) {
        (true, Some(normalized)) => Ok(normalized),
        _ => Err(MemoryViewError::Validation(
            result.error.unwrap_or_else(|| format!("invalid {}", kind.as_str())),
        )),
    }
}

/// Whitespace-separated hex bytes, normalized. Any bad token rejects all.
fn parse_byte_tokens(value: &str) -> Result<Vec<String>, MemoryViewError> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(MemoryViewError::Validation("no bytes to write".to_string()));
    }

    tokens
        .into_iter()
        .map(|token| {
            let byte = validated(InputKind::Hex, token)?;
            // "0x" plus two digits
            if byte.len() > 4 {
                return Err(MemoryViewError::Validation(format!(
                    "'{}' does not fit in one byte",
                    token
                )));
            }
            Ok(byte)
        })
        .collect()
}

/// Hex dump with an ASCII column
pub fn render_dump(state: &MemoryViewState, dump: &MemoryDump) -> Vec<String> {
    let per_line = state.bytes_per_line.max(1);
    let width = per_line * 3 - 1;

    let mut lines = vec![format!(
        "Memory at 0x{:x} ({} bytes, {})",
        state.base_address, state.size_bytes, state.format
    )];
    for (row, chunk) in dump.bytes.chunks(per_line).enumerate() {
        let address = dump.address.wrapping_add((row * per_line) as u64);
        let hex = chunk
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();
        lines.push(format!("0x{:016x}: {:<width$} |{}|", address, hex, ascii, width = width));
    }
    lines
}

/// Single memory inspection session
pub struct MemoryView<H: ViewHost> {
    dispatcher: Dispatcher,
    host: H,
    notifier: Arc<dyn Notifier>,
    state: Option<MemoryViewState>,
    buffer: Option<BufferHandle>,
    last_error: Option<String>,
    bytes_per_line: usize,
    max_bytes: usize,
}

impl<H: ViewHost> MemoryView<H> {
    pub fn new(dispatcher: Dispatcher, host: H, notifier: Arc<dyn Notifier>, config: &GdbConfig) -> Self {
        Self {
            dispatcher,
            host,
            notifier,
            state: None,
            buffer: None,
            last_error: None,
            bytes_per_line: config.bytes_per_line.max(1),
            max_bytes: config.max_view_bytes,
        }
    }

    /// `None` while inactive
    pub fn state(&self) -> Option<&MemoryViewState> {
        self.state.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Error currently rendered in the view, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn buffer(&self) -> Option<&BufferHandle> {
        self.buffer.as_ref()
    }

    /// Open (or retarget) the view at an address or symbolic expression
    pub async fn show(&mut self, address_or_expr: &str, size: usize) -> Result<(), MemoryViewError> {
        let normalized = validated(InputKind::Address, address_or_expr).map_err(|e| self.fail(e))?;
        if size == 0 || size > self.max_bytes {
            return Err(self.fail(MemoryViewError::Validation(format!(
                "size must be between 1 and {} bytes",
                self.max_bytes
            ))));
        }
        if !self.dispatcher.is_session_running() {
            return Err(self.fail(DispatchError::NotRunning.into()));
        }

        let result = match parse_address_literal(&normalized) {
            Some(address) => self.read(address, size).await,
            None => match self.resolve(&normalized).await {
                Ok(address) => self.read(address, size).await,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(dump) => {
                info!("Memory view at 0x{:x} ({} bytes)", dump.address, size);
                let state = MemoryViewState {
                    base_address: dump.address,
                    size_bytes: size,
                    bytes_per_line: self.bytes_per_line,
                    format: MemoryFormat::Hex,
                };
                self.last_error = None;
                self.render(&state, &dump);
                self.state = Some(state);
                Ok(())
            }
            Err(e) => {
                self.render_error(&normalized, &e);
                Err(self.fail(e))
            }
        }
    }

    /// Move the view by `offset` bytes.
    ///
    /// Moving below address zero is rejected without touching state or the
    /// debugger.
    pub async fn navigate(&mut self, offset: i64) -> Result<(), MemoryViewError> {
        let Some(state) = self.state.clone() else {
            return Err(self.fail(MemoryViewError::Inactive));
        };

        let target = state.base_address as i128 + offset as i128;
        if target < 0 {
            return Err(self.fail(MemoryViewError::Underflow {
                base: state.base_address,
                offset,
            }));
        }
        if target > u64::MAX as i128 {
            return Err(self.fail(MemoryViewError::Overflow {
                base: state.base_address,
                offset,
            }));
        }
        if !self.dispatcher.is_session_running() {
            return Err(self.fail(DispatchError::NotRunning.into()));
        }

        let target = target as u64;
        match self.read(target, state.size_bytes).await {
            Ok(dump) => {
                let state = MemoryViewState {
                    base_address: target,
                    ..state
                };
                self.last_error = None;
                self.render(&state, &dump);
                self.state = Some(state);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub async fn next_page(&mut self) -> Result<(), MemoryViewError> {
        let size = self.state.as_ref().map_or(0, |s| s.size_bytes);
        self.navigate(size as i64).await
    }

    pub async fn prev_page(&mut self) -> Result<(), MemoryViewError> {
        let size = self.state.as_ref().map_or(0, |s| s.size_bytes);
        self.navigate(-(size as i64)).await
    }

    /// Re-read the current page. A no-op with a notification when inactive.
    pub async fn refresh(&mut self) -> Result<(), MemoryViewError> {
        let Some(state) = self.state.clone() else {
            return Err(self.fail(MemoryViewError::Inactive));
        };
        if !self.dispatcher.is_session_running() {
            return Err(self.fail(DispatchError::NotRunning.into()));
        }

        match self.read(state.base_address, state.size_bytes).await {
            Ok(dump) => {
                self.last_error = None;
                self.render(&state, &dump);
                Ok(())
            }
            Err(e) => {
                self.render_error(&format!("0x{:x}", state.base_address), &e);
                Err(self.fail(e))
            }
        }
    }

    /// Write a variable, or a run of bytes starting at an address.
    ///
    /// Byte values are validated up front; one bad token means nothing is
    /// written. Once writing starts each byte stands alone: a failure is
    /// reported in [`EditOutcome::Partial`] and earlier bytes stay written.
    pub async fn edit(&mut self, target: EditTarget, value: &str) -> Result<EditOutcome, MemoryViewError> {
        let outcome = match target {
            EditTarget::Variable(name) => self.edit_variable(&name, value).await?,
            EditTarget::Address(address) => self.edit_bytes(&address, value).await?,
        };

        if self.is_active() {
            // the edit already landed; a failed re-read is reported on its own
            let _ = self.refresh().await;
        }
        Ok(outcome)
    }

    async fn edit_variable(&mut self, name: &str, value: &str) -> Result<EditOutcome, MemoryViewError> {
        let name = validated(InputKind::Expression, name).map_err(|e| self.fail(e))?;
        let value = validated(InputKind::Expression, value).map_err(|e| self.fail(e))?;
        if !self.dispatcher.is_session_running() {
            return Err(self.fail(DispatchError::NotRunning.into()));
        }

        self.dispatcher
            .request(format!("set variable {} = {}", name, value), None)
            .await
            .map_err(|e| self.fail(e.into()))?;

        self.notifier.notify(&format!("Set {} = {}", name, value), Severity::Info);
        Ok(EditOutcome::Complete { written: 1 })
    }

    async fn edit_bytes(&mut self, address: &str, value: &str) -> Result<EditOutcome, MemoryViewError> {
        let normalized = validated(InputKind::Address, address).map_err(|e| self.fail(e))?;
        let bytes = parse_byte_tokens(value).map_err(|e| self.fail(e))?;
        if !self.dispatcher.is_session_running() {
            return Err(self.fail(DispatchError::NotRunning.into()));
        }

        let base = match parse_address_literal(&normalized) {
            Some(address) => address,
            None => self.resolve(&normalized).await.map_err(|e| self.fail(e))?,
        };
        if base.checked_add(bytes.len() as u64 - 1).is_none() {
            return Err(self.fail(MemoryViewError::Overflow {
                base,
                offset: bytes.len() as i64,
            }));
        }

        // queue every write before waiting so they go out back to back, in order
        let pending: Vec<(u64, PendingResponse)> = bytes
            .iter()
            .enumerate()
            .map(|(i, byte)| {
                let address = base + i as u64;
                let command = format!("set {{unsigned char}} 0x{:x} = {}", address, byte);
                (address, self.dispatcher.submit(command, None))
            })
            .collect();

        let mut written = 0;
        let mut failed = Vec::new();
        for (address, response) in pending {
            match response.wait().await {
                Ok(_) => written += 1,
                Err(e) => {
                    warn!("Byte write at 0x{:x} failed: {}", address, e);
                    failed.push(ByteWriteFailure {
                        address,
                        error: e.to_string(),
                    });
                }
            }
        }

        if failed.is_empty() {
            self.notifier.notify(
                &format!("Wrote {} byte(s) at 0x{:x}", written, base),
                Severity::Info,
            );
            Ok(EditOutcome::Complete { written })
        } else {
            self.notifier.notify(
                &format!(
                    "Wrote {} of {} byte(s) at 0x{:x}; first failure at 0x{:x}: {}",
                    written,
                    bytes.len(),
                    base,
                    failed[0].address,
                    failed[0].error
                ),
                Severity::Warn,
            );
            Ok(EditOutcome::Partial { written, failed })
        }
    }

    /// Close the view and return to `Inactive`. Safe to call at any time.
    pub fn cleanup_all(&mut self) {
        self.state = None;
        self.last_error = None;
        if let Some(handle) = self.buffer.take() {
            if let Err(e) = self.host.close_buffer(handle) {
                warn!("Failed to close memory view buffer: {}", e);
            }
        }
        debug!("Memory view cleaned up");
    }

    async fn resolve(&self, expr: &str) -> Result<u64, MemoryViewError> {
        let lines = self.dispatcher.request(format!("print &{}", expr), None).await?;
        extract_address(&lines).ok_or_else(|| MemoryViewError::Unresolved(expr.to_string()))
    }

    async fn read(&self, address: u64, size: usize) -> Result<MemoryDump, MemoryViewError> {
        let command = format!("x/{}{}b 0x{:x}", size, MemoryFormat::Hex.gdb_letter(), address);
        let lines = self.dispatcher.request(command, None).await?;
        parse_memory_dump(&lines).ok_or(MemoryViewError::Malformed)
    }

    fn render(&mut self, state: &MemoryViewState, dump: &MemoryDump) {
        let lines = render_dump(state, dump);
        self.show_lines(&lines);
    }

    fn render_error(&mut self, subject: &str, error: &MemoryViewError) {
        self.last_error = Some(error.to_string());
        let lines = vec![
            format!("Memory at {}", subject),
            String::new(),
            format!("Error: {}", error),
        ];
        self.show_lines(&lines);
    }

    fn show_lines(&mut self, lines: &[String]) {
        if self.buffer.is_none() {
            match self.host.create_buffer(BUFFER_TITLE) {
                Ok(handle) => self.buffer = Some(handle),
                Err(e) => {
                    self.notifier
                        .notify(&format!("Could not open memory view: {}", e), Severity::Warn);
                    return;
                }
            }
        }
        if let Some(handle) = &self.buffer {
            if let Err(e) = self.host.set_content(handle, lines) {
                self.notifier
                    .notify(&format!("Could not update memory view: {}", e), Severity::Warn);
            }
        }
    }

    fn fail(&self, error: MemoryViewError) -> MemoryViewError {
        let severity = match &error {
            MemoryViewError::Validation(_)
            | MemoryViewError::Inactive
            | MemoryViewError::Underflow { .. }
            | MemoryViewError::Overflow { .. } => Severity::Warn,
            _ => Severity::Error,
        };
        self.notifier.notify(&error.to_string(), severity);
        error
    }
}
