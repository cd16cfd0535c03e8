//! MCP Tool Definitions for the GDB dispatch layer

use serde::{Deserialize, Serialize};

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Tool: Start GDB session
pub fn tool_start_gdb() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_start".to_string(),
        description: "Start a GDB session driven through its console. Optionally load a program and override the GDB binary or request timeout.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "gdb_path": {
                    "type": "string",
                    "description": "Path to GDB executable (default: gdb, or GDB_DISPATCH_GDB)"
                },
                "program": {
                    "type": "string",
                    "description": "Executable to load into GDB"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Per-request timeout in milliseconds (default: 5000)"
                }
            },
            "required": []
        }),
    }
}

/// Tool: Stop GDB session
pub fn tool_stop_gdb() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_stop".to_string(),
        description: "Stop the current GDB session and close the memory view.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Tool: Validate user input
pub fn tool_validate_input() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_validate_input".to_string(),
        description: "Validate and normalize an address, expression, hex value or GDB command without sending anything to GDB.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "enum": ["address", "expression", "hex", "command"],
                    "description": "Kind of input to validate"
                },
                "value": {
                    "type": "string",
                    "description": "The raw input"
                }
            },
            "required": ["kind", "value"]
        }),
    }
}

/// Tool: Raw console command
pub fn tool_command() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_command".to_string(),
        description: "Send a GDB console command. Commands that would end or detach the session are refused; incomplete commands get a usage suggestion.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "GDB console command (e.g., 'info frame', 'bt')"
                },
                "priority": {
                    "type": "string",
                    "enum": ["normal", "high"],
                    "description": "High priority commands are sent before queued normal ones"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Timeout for this command in milliseconds"
                }
            },
            "required": ["command"]
        }),
    }
}

/// Tool: Evaluate expression
pub fn tool_evaluate() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_evaluate".to_string(),
        description: "Evaluate an expression in the current frame and return its value.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Expression to evaluate (e.g., 'x + y', 'ptr->field', 'arr[0]')"
                }
            },
            "required": ["expression"]
        }),
    }
}

/// Tool: Open the memory view
pub fn tool_memory_show() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_memory_show".to_string(),
        description: "Open the memory view at an address or symbol and return the hex dump.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "address": {
                    "type": "string",
                    "description": "Address (0x1000, 4096) or symbol (buf, s.field)"
                },
                "size": {
                    "type": "integer",
                    "description": "Number of bytes to show (default: 256, max: 4096)"
                }
            },
            "required": ["address"]
        }),
    }
}

/// Tool: Move the memory view
pub fn tool_memory_navigate() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_memory_navigate".to_string(),
        description: "Move the memory view by a signed byte offset. Moving below address 0 is refused.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "offset": {
                    "type": "integer",
                    "description": "Signed offset in bytes"
                }
            },
            "required": ["offset"]
        }),
    }
}

/// Tool: Page the memory view
pub fn tool_memory_page() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_memory_page".to_string(),
        description: "Move the memory view one page forward or back.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "direction": {
                    "type": "string",
                    "enum": ["next", "prev"],
                    "description": "Page direction"
                }
            },
            "required": ["direction"]
        }),
    }
}

/// Tool: Refresh the memory view
pub fn tool_memory_refresh() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_memory_refresh".to_string(),
        description: "Re-read the memory currently shown.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Tool: Edit memory
pub fn tool_memory_edit() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_memory_edit".to_string(),
        description: "Set a variable, or write hex bytes starting at an address. Byte writes are not atomic: a failed byte does not undo earlier ones.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "enum": ["variable", "address"],
                    "description": "What 'location' names"
                },
                "location": {
                    "type": "string",
                    "description": "Variable name or address"
                },
                "value": {
                    "type": "string",
                    "description": "New value; for addresses, whitespace-separated hex bytes (e.g., 'DE AD BE EF')"
                }
            },
            "required": ["target", "location", "value"]
        }),
    }
}

/// Tool: Close the memory view
pub fn tool_memory_close() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_memory_close".to_string(),
        description: "Close the memory view.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Tool: List breakpoints
pub fn tool_breakpoints_list() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_breakpoints_list".to_string(),
        description: "List breakpoints with their file, line and enabled state.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "refresh": {
                    "type": "boolean",
                    "description": "Re-read the table from GDB instead of using the cached one"
                }
            },
            "required": []
        }),
    }
}

/// Tool: Toggle breakpoint
pub fn tool_breakpoint_toggle() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_breakpoint_toggle".to_string(),
        description: "Remove the breakpoint at file:line, or set one if there is none.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "file": {
                    "type": "string",
                    "description": "Source file (a trailing path component is enough)"
                },
                "line": {
                    "type": "integer",
                    "description": "Line number"
                }
            },
            "required": ["file", "line"]
        }),
    }
}

/// Tool: Enable/disable breakpoint
pub fn tool_breakpoint_enable() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_breakpoint_enable".to_string(),
        description: "Enable or disable a breakpoint by number.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "number": {
                    "type": "integer",
                    "description": "Breakpoint number"
                },
                "enabled": {
                    "type": "boolean",
                    "description": "true to enable, false to disable"
                }
            },
            "required": ["number", "enabled"]
        }),
    }
}

/// Tool: Dispatcher metrics
pub fn tool_metrics() -> ToolDefinition {
    ToolDefinition {
        name: "gdb_metrics".to_string(),
        description: "Show request counters and response latency of the command dispatcher.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// Get all available tools
pub fn get_all_tools() -> Vec<ToolDefinition> {
    vec![
        tool_start_gdb(),
        tool_stop_gdb(),
        tool_validate_input(),
        tool_command(),
        tool_evaluate(),
        tool_memory_show(),
        tool_memory_navigate(),
        tool_memory_page(),
        tool_memory_refresh(),
        tool_memory_edit(),
        tool_memory_close(),
        tool_breakpoints_list(),
        tool_breakpoint_toggle(),
        tool_breakpoint_enable(),
        tool_metrics(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_are_unique() {
        let tools = get_all_tools();
        let names: HashSet<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
        assert_eq!(tools.len(), 15);
    }

    #[test]
    fn test_required_fields_are_properties() {
        for tool in get_all_tools() {
            let properties = tool.input_schema["properties"].as_object().unwrap();
            for required in tool.input_schema["required"].as_array().unwrap() {
                assert!(
                    properties.contains_key(required.as_str().unwrap()),
                    "{} requires undeclared {}",
                    tool.name,
                    required
                );
            }
        }
    }
}
