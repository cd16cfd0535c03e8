//! Scripted gdb stand-in for unit tests

use crate::gdb::host::{BufferHandle, Notifier, ViewHost};
use crate::gdb::error::ResourceError;
use crate::gdb::session::ChannelPeer;
use crate::gdb::types::{GdbConfig, Severity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) fn test_config() -> GdbConfig {
    GdbConfig {
        timeout_ms: 1000,
        ..Default::default()
    }
}

/// Answer every command with `respond(command)` followed by a prompt.
///
/// Returns the log of commands received, in order.
pub(crate) fn fake_gdb<F>(mut peer: ChannelPeer, respond: F) -> Arc<Mutex<Vec<String>>>
where
    F: Fn(&str) -> String + Send + 'static,
{
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&log);
    tokio::spawn(async move {
        while let Some(command) = peer.next_command().await {
            seen.lock().unwrap().push(command.clone());
            let reply = respond(&command);
            if !peer.send_output(format!("{}(gdb) ", reply)) {
                break;
            }
        }
    });
    log
}

/// Notifier that records everything it is told
#[derive(Default, Clone)]
pub(crate) struct RecordingNotifier {
    pub messages: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        self.messages.lock().unwrap().push((severity, message.to_string()));
    }
}

/// View host whose buffers can be made to fail on demand
#[derive(Default)]
pub(crate) struct FlakyHost {
    pub buffers: HashMap<u64, Vec<String>>,
    pub next_id: u64,
    pub fail_create: bool,
    pub fail_close: bool,
    pub closed: usize,
}

impl ViewHost for FlakyHost {
    fn create_buffer(&mut self, _title: &str) -> Result<BufferHandle, ResourceError> {
        if self.fail_create {
            return Err(ResourceError("no window available".to_string()));
        }
        self.next_id += 1;
        self.buffers.insert(self.next_id, Vec::new());
        Ok(BufferHandle::new(self.next_id))
    }

    fn set_content(&mut self, handle: &BufferHandle, lines: &[String]) -> Result<(), ResourceError> {
        let buffer = self
            .buffers
            .get_mut(&handle.id())
            .ok_or_else(|| ResourceError("stale buffer".to_string()))?;
        *buffer = lines.to_vec();
        Ok(())
    }

    fn close_buffer(&mut self, handle: BufferHandle) -> Result<(), ResourceError> {
        self.closed += 1;
        if self.fail_close {
            return Err(ResourceError("window already gone".to_string()));
        }
        self.buffers.remove(&handle.id());
        Ok(())
    }
}

impl FlakyHost {
    pub fn only_content(&self) -> Vec<String> {
        self.buffers.values().next().cloned().unwrap_or_default()
    }
}
