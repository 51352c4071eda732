//! Run lifecycle events.
//!
//! The orchestrator reports every state change through an [`EventSink`].
//! Event types are dotted names (`run.started`, `action.completed`, ...) and
//! payloads are JSON objects stamped with an ISO-8601 timestamp.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::utils::iso_timestamp;
use serde_json::{json, Value};
use uuid::Uuid;

/// A run was started for a commit.
pub const RUN_STARTED: &str = "run.started";
/// A run reached a terminal state.
pub const RUN_COMPLETED: &str = "run.completed";
/// A stage started.
pub const STAGE_STARTED: &str = "stage.started";
/// Every action of a stage succeeded.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// An action was scheduled.
pub const ACTION_STARTED: &str = "action.started";
/// An action reached a terminal status.
pub const ACTION_COMPLETED: &str = "action.completed";
/// An approval request is waiting for a decision.
pub const APPROVAL_REQUESTED: &str = "approval.requested";
/// An approval request was decided or expired.
pub const APPROVAL_RESOLVED: &str = "approval.resolved";
/// A commit event did not start a run.
pub const COMMIT_IGNORED: &str = "commit.ignored";

/// Builds an event payload for a run, merging `fields` into it.
#[must_use]
pub fn run_payload(execution_id: Uuid, fields: Value) -> Value {
    let mut payload = json!({
        "execution_id": execution_id.to_string(),
        "timestamp": iso_timestamp(),
    });
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), fields) {
        target.extend(extra);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_payload_merges_fields() {
        let id = Uuid::new_v4();
        let payload = run_payload(id, json!({"stage": "Build"}));

        assert_eq!(payload["execution_id"], id.to_string());
        assert_eq!(payload["stage"], "Build");
        assert!(payload["timestamp"].as_str().unwrap().ends_with("+00:00"));
    }

    #[test]
    fn test_run_payload_ignores_non_object_fields() {
        let payload = run_payload(Uuid::nil(), Value::Null);
        assert_eq!(payload.as_object().unwrap().len(), 2);
    }
}
