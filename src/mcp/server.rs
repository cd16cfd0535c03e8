//! MCP Server Handler Implementation

use crate::gdb::{
    validate_input, BreakpointIndex, Dispatcher, EditTarget, EvaluateSession, GdbConfig, GdbProcess, InputKind,
    MemoryView, NoticeLog, Notifier, Priority, RequestOptions, ScratchBuffers, SessionIo, Severity, ToggleOutcome,
};
use crate::mcp::protocol::*;
use crate::mcp::tools::get_all_tools;
use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

type Args = Option<serde_json::Map<String, serde_json::Value>>;

fn str_arg(args: &Args, key: &str) -> Option<String> {
    args.as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn required_str(args: &Args, key: &str) -> Result<String> {
    str_arg(args, key).ok_or_else(|| anyhow!("{} is required", key))
}

fn int_arg(args: &Args, key: &str) -> Option<i64> {
    args.as_ref().and_then(|a| a.get(key)).and_then(|v| v.as_i64())
}

fn bool_arg(args: &Args, key: &str) -> Option<bool> {
    args.as_ref().and_then(|a| a.get(key)).and_then(|v| v.as_bool())
}

fn not_started() -> CallToolResult {
    CallToolResult::error_text("No GDB session is running. Use gdb_start first.")
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warn => "warn",
        Severity::Error => "error",
    }
}

/// Everything bound to one debugger session
struct Session {
    dispatcher: Dispatcher,
    memory: MemoryView<ScratchBuffers>,
    breakpoints: BreakpointIndex,
    evaluator: EvaluateSession,
    pid: Option<u32>,
}

impl Session {
    fn new<S: SessionIo>(io: S, config: &GdbConfig, notices: &NoticeLog, pid: Option<u32>) -> Self {
        let dispatcher = Dispatcher::spawn(io, config);
        let notifier: Arc<dyn Notifier> = Arc::new(notices.clone());
        Self {
            memory: MemoryView::new(dispatcher.clone(), ScratchBuffers::new(), Arc::clone(&notifier), config),
            breakpoints: BreakpointIndex::new(dispatcher.clone()),
            evaluator: EvaluateSession::new(dispatcher.clone(), notifier),
            dispatcher,
            pid,
        }
    }

    fn memory_text(&self) -> String {
        self.memory
            .buffer()
            .and_then(|handle| self.memory.host().content(handle))
            .map(|lines| lines.join("\n"))
            .unwrap_or_default()
    }
}

/// GDB MCP Server
pub struct GdbMcpServer {
    config: GdbConfig,
    session: Arc<RwLock<Option<Session>>>,
    notices: NoticeLog,
}

impl GdbMcpServer {
    pub fn new(config: GdbConfig) -> Self {
        Self {
            config,
            session: Arc::new(RwLock::new(None)),
            notices: NoticeLog::new(),
        }
    }

    /// Drive an already running debugger, e.g. one owned by a host REPL
    pub async fn attach<S: SessionIo>(&self, io: S) -> Result<()> {
        let mut guard = self.session.write().await;
        if guard.is_some() {
            bail!("GDB session already running");
        }
        *guard = Some(Session::new(io, &self.config, &self.notices, None));
        Ok(())
    }

    /// Get server info
    pub fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Drives GDB through its console, one command at a time.\n\n\
                 Start with 'gdb_start'. Inspect memory with 'gdb_memory_show' and move around with \
                 'gdb_memory_navigate' and 'gdb_memory_page'. Evaluate expressions with 'gdb_evaluate' and \
                 toggle breakpoints with 'gdb_breakpoint_toggle'. Use 'gdb_validate_input' to check input \
                 without touching GDB."
                    .to_string(),
            ),
        }
    }

    /// Handle initialize request
    pub async fn handle_initialize(&self, _params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.get_info())?)
    }

    /// Handle tools/list request
    pub async fn handle_tools_list(&self) -> Result<serde_json::Value> {
        let tools: Vec<Tool> = get_all_tools()
            .into_iter()
            .map(|t| Tool {
                name: t.name,
                description: Some(t.description),
                input_schema: t.input_schema,
            })
            .collect();

        Ok(serde_json::to_value(ListToolsResult {
            tools,
            next_cursor: None,
        })?)
    }

    /// Handle tools/call request
    pub async fn handle_tools_call(&self, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let params = params.ok_or_else(|| anyhow!("Missing params"))?;
        let request: CallToolRequest = serde_json::from_value(params)?;

        debug!("Calling tool: {}", request.name);

        let args = request.arguments;
        let result = match request.name.as_str() {
            "gdb_start" => self.handle_start(&args).await,
            "gdb_stop" => self.handle_stop().await,
            "gdb_validate_input" => self.handle_validate_input(&args),
            "gdb_command" => self.handle_command(&args).await,
            "gdb_evaluate" => self.handle_evaluate(&args).await,
            "gdb_memory_show" => self.handle_memory_show(&args).await,
            "gdb_memory_navigate" => self.handle_memory_navigate(&args).await,
            "gdb_memory_page" => self.handle_memory_page(&args).await,
            "gdb_memory_refresh" => self.handle_memory_refresh().await,
            "gdb_memory_edit" => self.handle_memory_edit(&args).await,
            "gdb_memory_close" => self.handle_memory_close().await,
            "gdb_breakpoints_list" => self.handle_breakpoints_list(&args).await,
            "gdb_breakpoint_toggle" => self.handle_breakpoint_toggle(&args).await,
            "gdb_breakpoint_enable" => self.handle_breakpoint_enable(&args).await,
            "gdb_metrics" => self.handle_metrics().await,
            _ => Ok(CallToolResult::error_text(format!("Unknown tool: {}", request.name))),
        };

        let mut result = result.unwrap_or_else(|e| CallToolResult::error_text(e.to_string()));
        self.append_notices(&mut result);
        Ok(serde_json::to_value(result)?)
    }

    /// Attach notifications raised during the call, minus those already in the result
    fn append_notices(&self, result: &mut CallToolResult) {
        for (severity, message) in self.notices.drain() {
            let repeated = result.content.iter().any(|content| match content {
                Content::Text { text } => text.contains(&message),
            });
            if !repeated {
                result
                    .content
                    .push(Content::text(format!("[{}] {}", severity_label(severity), message)));
            }
        }
    }

    // ========================================================================
    // Tool Handlers
    // ========================================================================

    async fn handle_start(&self, args: &Args) -> Result<CallToolResult> {
        let mut guard = self.session.write().await;
        if guard.is_some() {
            return Ok(CallToolResult::error_text("GDB session already running. Use gdb_stop first."));
        }

        let mut config = self.config.clone();
        if let Some(gdb_path) = str_arg(args, "gdb_path") {
            config.gdb_path = gdb_path;
        }
        if let Some(timeout_ms) = int_arg(args, "timeout_ms").filter(|ms| *ms > 0) {
            config.timeout_ms = timeout_ms as u64;
        }
        let program = str_arg(args, "program");

        info!("Starting GDB session with: {}", config.gdb_path);
        let process = GdbProcess::spawn(&config, program.as_deref()).await?;
        let pid = process.id();
        *guard = Some(Session::new(process, &config, &self.notices, pid));

        let mut message = match pid {
            Some(pid) => format!("GDB session started (pid {}).", pid),
            None => "GDB session started.".to_string(),
        };
        if let Some(program) = program {
            message.push_str(&format!(" Loaded {}.", program));
        }
        Ok(CallToolResult::text(message))
    }

    async fn handle_stop(&self) -> Result<CallToolResult> {
        info!("Stopping GDB session");

        let mut guard = self.session.write().await;
        match guard.take() {
            Some(mut session) => {
                session.memory.cleanup_all();
                debug!("Dropping session for pid {:?}", session.pid);
                Ok(CallToolResult::text("GDB session stopped."))
            }
            None => Ok(CallToolResult::error_text("No GDB session is running.")),
        }
    }

    fn handle_validate_input(&self, args: &Args) -> Result<CallToolResult> {
        let kind = required_str(args, "kind")?;
        let value = required_str(args, "value")?;
        let result = validate_input(&kind, &value);
        Ok(CallToolResult::text(serde_json::to_string_pretty(&result)?))
    }

    async fn handle_command(&self, args: &Args) -> Result<CallToolResult> {
        let command = required_str(args, "command")?;

        let checked = validate_input(InputKind::Command.as_str(), &command);
        let command = match (checked.valid, checked.normalized) {
            (true, Some(command)) => command,
            _ => {
                let mut content = vec![Content::text(checked.error.unwrap_or_default())];
                if let Some(hint) = checked.hint {
                    content.push(Content::text(format!("Suggestion: {}", hint)));
                }
                return Ok(CallToolResult::error(content));
            }
        };

        let mut opts = RequestOptions::default();
        if str_arg(args, "priority").as_deref() == Some("high") {
            opts.priority = Priority::High;
        }
        if let Some(ms) = int_arg(args, "timeout_ms").filter(|ms| *ms > 0) {
            opts.timeout = Some(Duration::from_millis(ms as u64));
        }

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        let response = session.dispatcher.request(command, Some(opts)).await;
        // a raw command may have changed anything
        session.breakpoints.invalidate();

        match response {
            Ok(lines) => {
                let mut content = vec![Content::text(lines.join("\n"))];
                if let Some(hint) = checked.hint {
                    content.push(Content::text(format!("Suggestion: {}", hint)));
                }
                Ok(CallToolResult::success(content))
            }
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_evaluate(&self, args: &Args) -> Result<CallToolResult> {
        let expression = required_str(args, "expression")?;

        let guard = self.session.read().await;
        let Some(session) = guard.as_ref() else {
            return Ok(not_started());
        };

        match session.evaluator.evaluate(&expression).await {
            Ok(evaluation) => {
                let label = match evaluation.history_index {
                    Some(index) => format!("${}", index),
                    None => evaluation.expression.clone(),
                };
                Ok(CallToolResult::success(vec![
                    Content::text(format!("{} = {}", label, evaluation.value)),
                    Content::text(serde_json::to_string_pretty(&evaluation)?),
                ]))
            }
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_memory_show(&self, args: &Args) -> Result<CallToolResult> {
        let address = required_str(args, "address")?;
        let size = match int_arg(args, "size") {
            Some(size) if size > 0 => size as usize,
            Some(size) => return Ok(CallToolResult::error_text(format!("Invalid size: {}", size))),
            None => self.config.default_view_bytes,
        };

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        match session.memory.show(&address, size).await {
            Ok(()) => Ok(CallToolResult::text(session.memory_text())),
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_memory_navigate(&self, args: &Args) -> Result<CallToolResult> {
        let offset = int_arg(args, "offset").ok_or_else(|| anyhow!("offset is required"))?;

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        match session.memory.navigate(offset).await {
            Ok(()) => Ok(CallToolResult::text(session.memory_text())),
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_memory_page(&self, args: &Args) -> Result<CallToolResult> {
        let direction = required_str(args, "direction")?;

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        let result = match direction.as_str() {
            "next" => session.memory.next_page().await,
            "prev" => session.memory.prev_page().await,
            other => {
                return Ok(CallToolResult::error_text(format!(
                    "Unknown direction '{}'. Use 'next' or 'prev'.",
                    other
                )))
            }
        };

        match result {
            Ok(()) => Ok(CallToolResult::text(session.memory_text())),
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_memory_refresh(&self) -> Result<CallToolResult> {
        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        match session.memory.refresh().await {
            Ok(()) => Ok(CallToolResult::text(session.memory_text())),
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_memory_edit(&self, args: &Args) -> Result<CallToolResult> {
        let location = required_str(args, "location")?;
        let value = required_str(args, "value")?;
        let target = match required_str(args, "target")?.as_str() {
            "variable" => EditTarget::Variable(location),
            "address" => EditTarget::Address(location),
            other => {
                return Ok(CallToolResult::error_text(format!(
                    "Unknown edit target '{}'. Use 'variable' or 'address'.",
                    other
                )))
            }
        };

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        let outcome = match session.memory.edit(target, &value).await {
            Ok(outcome) => outcome,
            Err(e) => return Ok(CallToolResult::error_text(e.to_string())),
        };

        let mut content = vec![Content::text(serde_json::to_string_pretty(&outcome)?)];
        if session.memory.is_active() {
            content.push(Content::text(session.memory_text()));
        }
        if outcome.is_complete() {
            Ok(CallToolResult::success(content))
        } else {
            Ok(CallToolResult::error(content))
        }
    }

    async fn handle_memory_close(&self) -> Result<CallToolResult> {
        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        session.memory.cleanup_all();
        Ok(CallToolResult::text("Memory view closed."))
    }

    async fn handle_breakpoints_list(&self, args: &Args) -> Result<CallToolResult> {
        let refresh = bool_arg(args, "refresh").unwrap_or(false);

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        let table = if refresh {
            session.breakpoints.refresh().await.map(|b| b.to_vec())
        } else {
            session.breakpoints.breakpoints().await
        };
        let table = match table {
            Ok(table) => table,
            Err(e) => return Ok(CallToolResult::error_text(e.to_string())),
        };

        if table.is_empty() {
            return Ok(CallToolResult::text("No breakpoints."));
        }

        let summary = table
            .iter()
            .map(|bp| {
                format!(
                    "#{} {}:{}{}{}",
                    bp.num,
                    bp.file,
                    bp.line,
                    bp.function
                        .as_ref()
                        .map(|f| format!(" in {}", f))
                        .unwrap_or_default(),
                    if bp.enabled { "" } else { " (disabled)" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(CallToolResult::success(vec![
            Content::text(summary),
            Content::text(serde_json::to_string_pretty(&table)?),
        ]))
    }

    async fn handle_breakpoint_toggle(&self, args: &Args) -> Result<CallToolResult> {
        let file = required_str(args, "file")?;
        let line = int_arg(args, "line").ok_or_else(|| anyhow!("line is required"))?;
        let line = u32::try_from(line).map_err(|_| anyhow!("Invalid line number: {}", line))?;

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        match session.breakpoints.toggle(&file, line).await {
            Ok(ToggleOutcome::Added { num: Some(num) }) => Ok(CallToolResult::text(format!(
                "Breakpoint {} set at {}:{}",
                num, file, line
            ))),
            Ok(ToggleOutcome::Added { num: None }) => {
                Ok(CallToolResult::text(format!("Breakpoint set at {}:{}", file, line)))
            }
            Ok(ToggleOutcome::Removed { num }) => Ok(CallToolResult::text(format!(
                "Breakpoint {} at {}:{} removed",
                num, file, line
            ))),
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_breakpoint_enable(&self, args: &Args) -> Result<CallToolResult> {
        let number = int_arg(args, "number").ok_or_else(|| anyhow!("number is required"))?;
        let number = u32::try_from(number).map_err(|_| anyhow!("Invalid breakpoint number: {}", number))?;
        let enabled = bool_arg(args, "enabled").ok_or_else(|| anyhow!("enabled is required"))?;

        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Ok(not_started());
        };

        match session.breakpoints.set_enabled(number, enabled).await {
            Ok(()) => Ok(CallToolResult::text(format!(
                "Breakpoint {} {}.",
                number,
                if enabled { "enabled" } else { "disabled" }
            ))),
            Err(e) => Ok(CallToolResult::error_text(e.to_string())),
        }
    }

    async fn handle_metrics(&self) -> Result<CallToolResult> {
        let guard = self.session.read().await;
        let Some(session) = guard.as_ref() else {
            return Ok(not_started());
        };

        Ok(CallToolResult::text(serde_json::to_string_pretty(
            &session.dispatcher.metrics(),
        )?))
    }
}

impl Default for GdbMcpServer {
    fn default() -> Self {
        Self::new(GdbConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::testing::{fake_gdb, test_config};
    use crate::gdb::ChannelSession;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn reply(cmd: &str) -> String {
        match cmd {
            "print counter" => "$1 = 42\n".to_string(),
            "info frame" => "Stack level 0, frame at 0x7ffc:\n rip = 0x1139 in main\n".to_string(),
            "x/16xb 0x10" => "0x10:\t0x41\t0x42\t0x43\t0x44\t0x45\t0x46\t0x47\t0x48\n\
                              0x18:\t0x00\t0x00\t0x00\t0x00\t0x00\t0x00\t0x00\t0x00\n"
                .to_string(),
            _ => "Undefined command: \"bogus\".  Try \"help\".\n".to_string(),
        }
    }

    async fn attached() -> (GdbMcpServer, Arc<Mutex<Vec<String>>>) {
        let server = GdbMcpServer::new(test_config());
        let (session, peer) = ChannelSession::pair();
        let log = fake_gdb(peer, reply);
        server.attach(session).await.unwrap();
        (server, log)
    }

    async fn call(server: &GdbMcpServer, name: &str, args: Value) -> Value {
        server
            .handle_tools_call(Some(json!({ "name": name, "arguments": args })))
            .await
            .unwrap()
    }

    fn texts(result: &Value) -> Vec<String> {
        result["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["text"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_tools_need_a_session() {
        let server = GdbMcpServer::new(test_config());
        let result = call(&server, "gdb_evaluate", json!({ "expression": "counter" })).await;
        assert_eq!(result["isError"], true);
        assert!(texts(&result)[0].contains("gdb_start"));

        let result = call(&server, "gdb_validate_input", json!({ "kind": "address", "value": "4096" })).await;
        assert_eq!(result["isError"], false);
        assert!(texts(&result)[0].contains("0x1000"));
    }

    #[tokio::test]
    async fn test_evaluate_and_command() {
        let (server, log) = attached().await;

        let result = call(&server, "gdb_evaluate", json!({ "expression": "counter" })).await;
        assert_eq!(texts(&result)[0], "$1 = 42");

        let result = call(&server, "gdb_command", json!({ "command": "info frame" })).await;
        assert_eq!(result["isError"], false);
        assert!(texts(&result)[0].starts_with("Stack level 0"));

        let result = call(&server, "gdb_command", json!({ "command": "bogus" })).await;
        assert_eq!(result["isError"], true);
        assert!(texts(&result)[0].starts_with("Undefined command"));

        assert_eq!(*log.lock().unwrap(), vec!["print counter", "info frame", "bogus"]);
    }

    #[tokio::test]
    async fn test_command_guard_refuses_quit() {
        let (server, log) = attached().await;
        let result = call(&server, "gdb_command", json!({ "command": "quit" })).await;
        assert_eq!(result["isError"], true);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_tools_report_notices() {
        let (server, log) = attached().await;

        let result = call(&server, "gdb_memory_show", json!({ "address": "0x10", "size": 16 })).await;
        assert_eq!(result["isError"], false);
        let dump = &texts(&result)[0];
        assert!(dump.starts_with("Memory at 0x10 (16 bytes, hex)"));
        assert!(dump.contains("|ABCDEFGH........|"));

        let result = call(&server, "gdb_memory_navigate", json!({ "offset": -100 })).await;
        assert_eq!(result["isError"], true);
        assert!(texts(&result)[0].contains("below address 0x0"));
        assert_eq!(log.lock().unwrap().len(), 1);

        let result = call(&server, "gdb_memory_close", json!({})).await;
        assert_eq!(result["isError"], false);
        let result = call(&server, "gdb_memory_refresh", json!({})).await;
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_missing_args() {
        let (server, _) = attached().await;
        let result = call(&server, "gdb_teleport", json!({})).await;
        assert_eq!(result["isError"], true);

        let result = call(&server, "gdb_memory_show", json!({})).await;
        assert_eq!(result["isError"], true);
        assert!(texts(&result)[0].contains("address is required"));
    }

    #[tokio::test]
    async fn test_stop_then_metrics() {
        let (server, _) = attached().await;
        call(&server, "gdb_evaluate", json!({ "expression": "counter" })).await;

        let result = call(&server, "gdb_metrics", json!({})).await;
        let metrics: Value = serde_json::from_str(&texts(&result)[0]).unwrap();
        assert_eq!(metrics["completed"], 1);

        let result = call(&server, "gdb_stop", json!({})).await;
        assert_eq!(result["isError"], false);
        let result = call(&server, "gdb_metrics", json!({})).await;
        assert_eq!(result["isError"], true);
    }
}
