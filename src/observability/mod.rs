//! Diagnostics capability injected into conversion and transport code.
//!
//! Recovery of malformed provider output never fails a call; each dropped or
//! patched item is reported here instead. Callers choose where reports go:
//! [`TracingSink`] forwards to `tracing`, [`MemorySink`] keeps them for
//! inspection.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Receives non-fatal diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn warn(&self, component: &'static str, message: &str);
}

/// Default sink: structured `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn warn(&self, component: &'static str, message: &str) {
        tracing::warn!(component, "{message}");
    }
}

/// A recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub component: String,
    pub message: String,
    pub timestamp: String,
}

/// Buffers diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn warn(&self, component: &'static str, message: &str) {
        self.events.lock().push(DiagnosticEvent {
            component: component.to_string(),
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}
