//! Audit events for successful mutations.
//!
//! The engine records one [`AuditEvent`] after each committed change. Sinks
//! are write-only: recording never fails the operation that produced it.

use contentive_db::Actor;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor: Actor,
    /// Dotted action name, e.g. `schema.update` or `version.restore`.
    pub action: String,
    /// `<kind>:<id>` of the affected resource.
    pub resource: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(actor: Actor, action: &str, resource: String, details: Value) -> Self {
        Self {
            actor,
            action: action.to_string(),
            resource,
            timestamp: chrono::Utc::now().timestamp_millis(),
            details,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event on the `contentive::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = match serde_json::to_string(&event.details) {
            Ok(details) => details,
            Err(err) => {
                warn!(target: "contentive::audit", action = %event.action, "Failed to serialize audit details: {}", err);
                return;
            }
        };
        info!(
            target: "contentive::audit",
            actor = %event.actor,
            action = %event.action,
            resource = %event.resource,
            timestamp = event.timestamp,
            details = %details,
            "audit"
        );
    }
}

/// Keeps events in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
