//! GDB dispatch layer with an MCP tool surface

pub mod gdb;
pub mod mcp;
