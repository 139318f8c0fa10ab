//! Audit recording.
//!
//! Services emit one event at the point where a mutation is applied (or refused). Recording is
//! best-effort: a failing sink is logged and ignored so it can never block or undo the action
//! it describes.

use crate::access::ResourceKind;
use crate::principal::Principal;
use crate::{CareError, CareResult};
use careflow_types::{RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    StatusChange,
    Share,
    RevokeShare,
    NewVersion,
    Amend,
    Dispense,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub resource_type: ResourceKind,
    pub resource_id: Option<RecordId>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn write(&self, event: &AuditEvent) -> CareResult<()>;
}

/// Front for an [`AuditSink`] that never propagates sink failures.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn record(&self, event: AuditEvent) {
        if let Err(err) = self.sink.write(&event) {
            tracing::warn!(
                error = %err,
                action = ?event.action,
                resource_type = %event.resource_type,
                "failed to record audit event"
            );
        }
    }

    /// Records the outcome of an operation, deriving success, denial or failure from `result`.
    pub fn record_result<T>(
        &self,
        principal: Option<&Principal>,
        action: AuditAction,
        resource_type: ResourceKind,
        resource_id: Option<RecordId>,
        at: DateTime<Utc>,
        result: &CareResult<T>,
    ) {
        let (outcome, reason) = match result {
            Ok(_) => (AuditOutcome::Success, None),
            Err(err) if err.is_denial() => (AuditOutcome::Denied, Some(err.to_string())),
            Err(err) => (AuditOutcome::Failure, Some(err.to_string())),
        };
        self.record(AuditEvent {
            actor: principal.map(|p| p.user_id),
            action,
            resource_type,
            resource_id,
            outcome,
            reason,
            at,
        });
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn for_resource(&self, resource_id: RecordId) -> Vec<AuditEvent> {
        self.filtered(|e| e.resource_id == Some(resource_id))
    }

    pub fn by_actor(&self, actor: UserId) -> Vec<AuditEvent> {
        self.filtered(|e| e.actor == Some(actor))
    }

    fn filtered(&self, keep: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|e| keep(e)).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn write(&self, event: &AuditEvent) -> CareResult<()> {
        self.events
            .lock()
            .map_err(|_| CareError::Store("audit log lock poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}

/// Sink that emits events as structured log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, event: &AuditEvent) -> CareResult<()> {
        tracing::info!(
            target: "careflow::audit",
            actor = ?event.actor.map(|a| a.to_string()),
            action = ?event.action,
            resource_type = %event.resource_type,
            resource_id = ?event.resource_id.map(|r| r.to_string()),
            outcome = ?event.outcome,
            reason = event.reason.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}
