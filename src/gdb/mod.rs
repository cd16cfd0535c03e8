//! GDB command dispatch and validation
//!
//! Everything here talks to gdb through its console: commands go in as text
//! lines and responses come back as prompt-delimited text.

pub mod breakpoints;
pub mod dispatcher;
pub mod error;
pub mod evaluate;
pub mod host;
pub mod memory;
pub mod parser;
pub mod session;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use breakpoints::{BreakpointIndex, ToggleOutcome};
pub use dispatcher::{debounce, Debounced, Dispatcher, PendingResponse};
pub use error::*;
pub use evaluate::EvaluateSession;
pub use host::{BufferHandle, NoticeLog, Notifier, ScratchBuffers, TracingNotifier, ViewHost};
pub use memory::MemoryView;
pub use session::{ChannelPeer, ChannelSession, GdbProcess, SessionFlag, SessionIo, SessionProbe};
pub use types::*;
pub use validate::{validate_input, InputKind};
