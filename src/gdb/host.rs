//! Host collaborators: notifications and display buffers
//!
//! The core treats buffers as capability tokens. It creates them, hands them
//! content and closes them, but never looks inside.

use crate::gdb::error::ResourceError;
use crate::gdb::types::Severity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// User-visible feedback sink
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Notifier that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warn => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}

/// Notifier that logs and keeps messages until they are drained
#[derive(Debug, Default, Clone)]
pub struct NoticeLog {
    notices: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every message recorded so far
    pub fn drain(&self) -> Vec<(Severity, String)> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl Notifier for NoticeLog {
    fn notify(&self, message: &str, severity: Severity) {
        TracingNotifier.notify(message, severity);
        self.notices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((severity, message.to_string()));
    }
}

/// Opaque handle to a host display buffer
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Buffer/window provisioning
pub trait ViewHost: Send {
    fn create_buffer(&mut self, title: &str) -> Result<BufferHandle, ResourceError>;
    fn set_content(&mut self, handle: &BufferHandle, lines: &[String]) -> Result<(), ResourceError>;
    fn close_buffer(&mut self, handle: BufferHandle) -> Result<(), ResourceError>;
}

/// In-memory buffers, read back by hosts without a real window system
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    buffers: HashMap<u64, (String, Vec<String>)>,
    next_id: u64,
}

impl ScratchBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self, handle: &BufferHandle) -> Option<&[String]> {
        self.buffers.get(&handle.0).map(|(_, lines)| lines.as_slice())
    }

    pub fn title(&self, handle: &BufferHandle) -> Option<&str> {
        self.buffers.get(&handle.0).map(|(title, _)| title.as_str())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl ViewHost for ScratchBuffers {
    fn create_buffer(&mut self, title: &str) -> Result<BufferHandle, ResourceError> {
        self.next_id += 1;
        self.buffers.insert(self.next_id, (title.to_string(), Vec::new()));
        Ok(BufferHandle(self.next_id))
    }

    fn set_content(&mut self, handle: &BufferHandle, lines: &[String]) -> Result<(), ResourceError> {
        let (_, content) = self
            .buffers
            .get_mut(&handle.0)
            .ok_or_else(|| ResourceError(format!("buffer {} does not exist", handle.0)))?;
        *content = lines.to_vec();
        Ok(())
    }

    fn close_buffer(&mut self, handle: BufferHandle) -> Result<(), ResourceError> {
        self.buffers
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| ResourceError(format!("buffer {} does not exist", handle.0)))
    }
}
