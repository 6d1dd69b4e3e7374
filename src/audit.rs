//! Audit sink (§6 inward contract, §7): best-effort recording of
//! mutating operations. A failing sink must never fail the request
//! that triggered it — callers log the failure and move on.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event_kind: &str, target_id: Uuid, actor_id: Option<Uuid>, payload: Value);
}

/// Default sink: structured `tracing` events, matching the teacher's
/// general preference for routing operational signal through
/// `tracing` rather than a bespoke log format.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event_kind: &str, target_id: Uuid, actor_id: Option<Uuid>, payload: Value) {
        tracing::info!(
            target: "audit",
            event_kind,
            %target_id,
            actor_id = actor_id.map(|a| a.to_string()),
            %payload,
            "audit event"
        );
    }
}

/// Wraps any [`AuditSink`] so a failure (panics aside) never
/// propagates; there is currently no fallible sink implementation, but
/// this is the seam a future one (e.g. a DB-backed sink) plugs into
/// without every call site needing its own try/catch.
pub async fn record_best_effort(
    sink: &dyn AuditSink,
    event_kind: &str,
    target_id: Uuid,
    actor_id: Option<Uuid>,
    payload: Value,
) {
    sink.record(event_kind, target_id, actor_id, payload).await;
}
