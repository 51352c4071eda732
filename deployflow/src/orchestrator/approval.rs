//! Manual approval gate.
//!
//! An approval action registers a request and suspends until an operator
//! approves or rejects it, or until its timeout elapses. Expiry counts as a
//! rejection.

use crate::core::RejectionReason;
use crate::utils::iso_timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A pending approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request id, used to approve or reject.
    pub id: Uuid,
    /// The run the request belongs to.
    pub execution_id: Uuid,
    /// The stage of the approval action.
    pub stage: String,
    /// The approval action.
    pub action: String,
    /// Reviewer notes.
    pub notes: Option<String>,
    /// How long the request stays open.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// When the request was registered (ISO 8601).
    pub requested_at: String,
}

impl ApprovalRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(
        execution_id: Uuid,
        stage: impl Into<String>,
        action: impl Into<String>,
        notes: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            stage: stage.into(),
            action: action.into(),
            notes,
            timeout,
            requested_at: iso_timestamp(),
        }
    }
}

/// The outcome of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// An operator approved.
    Approved,
    /// Rejected by an operator or expired.
    Rejected(RejectionReason),
}

#[derive(Debug)]
struct PendingApproval {
    request: ApprovalRequest,
    response_tx: Option<oneshot::Sender<bool>>,
}

/// Registry of pending approval requests.
#[derive(Default)]
pub struct ApprovalGate {
    /// Pending requests in arrival order.
    pending: RwLock<Vec<PendingApproval>>,
    /// Woken whenever a request is registered.
    arrivals: Notify,
}

impl ApprovalGate {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request` and waits for a decision or expiry.
    pub async fn request(&self, request: ApprovalRequest) -> ApprovalDecision {
        let id = request.id;
        let timeout = request.timeout;
        let (tx, rx) = oneshot::channel();

        info!(
            request_id = %id,
            stage = %request.stage,
            action = %request.action,
            timeout_secs = timeout.as_secs(),
            "Approval requested"
        );
        self.pending.write().push(PendingApproval {
            request,
            response_tx: Some(tx),
        });
        self.arrivals.notify_waiters();

        let decision = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(true)) => ApprovalDecision::Approved,
            Ok(Ok(false)) | Ok(Err(_)) => ApprovalDecision::Rejected(RejectionReason::Rejected),
            Err(_) => {
                warn!(request_id = %id, "Approval expired");
                ApprovalDecision::Rejected(RejectionReason::Expired)
            }
        };
        self.remove(id);
        decision
    }

    /// Approves a pending request. Returns false if it is not pending.
    pub fn approve(&self, request_id: Uuid) -> bool {
        self.decide(request_id, true)
    }

    /// Rejects a pending request. Returns false if it is not pending.
    pub fn reject(&self, request_id: Uuid) -> bool {
        self.decide(request_id, false)
    }

    /// Returns the number of pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Waits until a request is pending and returns the oldest one.
    pub async fn next_pending(&self) -> ApprovalRequest {
        loop {
            let arrived = self.arrivals.notified();
            let oldest = self.pending.read().first().map(|p| p.request.clone());
            if let Some(request) = oldest {
                return request;
            }
            arrived.await;
        }
    }

    fn decide(&self, request_id: Uuid, approved: bool) -> bool {
        let tx = self.remove(request_id).and_then(|mut p| p.response_tx.take());
        match tx {
            Some(tx) => {
                debug!(request_id = %request_id, approved, "Approval decided");
                tx.send(approved).is_ok()
            }
            None => false,
        }
    }

    fn remove(&self, request_id: Uuid) -> Option<PendingApproval> {
        let mut pending = self.pending.write();
        let index = pending.iter().position(|p| p.request.id == request_id)?;
        Some(pending.remove(index))
    }
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(timeout: Duration) -> ApprovalRequest {
        ApprovalRequest::new(Uuid::new_v4(), "CloudFormation_Deploy", "Review", None, timeout)
    }

    #[tokio::test]
    async fn test_approved() {
        let gate = Arc::new(ApprovalGate::new());
        let waiter = gate.clone();
        let handle = tokio::spawn(async move { waiter.request(request(Duration::from_secs(60))).await });

        let pending = gate.next_pending().await;
        assert_eq!(pending.action, "Review");
        assert!(gate.approve(pending.id));

        assert_eq!(handle.await.unwrap(), ApprovalDecision::Approved);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected() {
        let gate = Arc::new(ApprovalGate::new());
        let waiter = gate.clone();
        let handle = tokio::spawn(async move { waiter.request(request(Duration::from_secs(60))).await });

        let pending = gate.next_pending().await;
        assert!(gate.reject(pending.id));

        assert_eq!(
            handle.await.unwrap(),
            ApprovalDecision::Rejected(RejectionReason::Rejected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_rejection() {
        let gate = ApprovalGate::new();
        let decision = gate.request(request(Duration::from_secs(7 * 24 * 60 * 60))).await;

        assert_eq!(decision, ApprovalDecision::Rejected(RejectionReason::Expired));
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let gate = ApprovalGate::new();
        assert!(!gate.approve(Uuid::new_v4()));
        assert!(!gate.reject(Uuid::new_v4()));
    }

    #[test]
    fn test_request_serializes_timeout_in_seconds() {
        let value = serde_json::to_value(request(Duration::from_secs(600))).unwrap();
        assert_eq!(value["timeout"], 600);
    }
}
