//! Approval requests as explicit suspend points.
//!
//! [`ApprovalGate::ask`] publishes `permission.asked` and parks the calling
//! turn on a oneshot channel until someone calls [`ApprovalGate::respond`]
//! or the turn is aborted. An `always` reply is remembered per session and
//! tool, so later requests for the same tool pass without asking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use helm_core::ids::{PermissionId, SessionId};
use helm_events::{BusEvent, EventBus, PermissionRequest};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::ToolError;

/// Answer to an approval request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Allow this call only.
    Once,
    /// Allow this call and future requests for the same tool in the session.
    Always,
    /// Refuse the call.
    Reject,
}

impl ApprovalDecision {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Always => "always",
            Self::Reject => "reject",
        }
    }
}

struct PendingApproval {
    request: PermissionRequest,
    reply: oneshot::Sender<ApprovalDecision>,
}

/// Registry of outstanding approval requests.
pub struct ApprovalGate {
    bus: Arc<EventBus>,
    pending: Mutex<HashMap<PermissionId, PendingApproval>>,
    always: DashMap<SessionId, HashSet<String>>,
}

impl ApprovalGate {
    /// Create a gate publishing on `bus`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pending: Mutex::new(HashMap::new()),
            always: DashMap::new(),
        }
    }

    /// Wait for a decision on `request`.
    ///
    /// Resolves immediately if the tool was approved with `always` earlier in
    /// the session. Returns [`ToolError::Rejected`] on rejection and
    /// [`ToolError::Cancelled`] if `cancel` fires first.
    pub async fn ask(
        &self,
        request: PermissionRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        if self
            .always
            .get(&request.session_id)
            .is_some_and(|set| set.contains(&request.tool))
        {
            debug!(tool = %request.tool, "approval remembered");
            return Ok(());
        }

        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(
            id.clone(),
            PendingApproval {
                request: request.clone(),
                reply: tx,
            },
        );
        info!(permission_id = %id, tool = %request.tool, kind = %request.kind, "approval requested");
        let _ = self.bus.publish(BusEvent::PermissionAsked(request));

        let decision = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = self.pending.lock().remove(&id);
                return Err(ToolError::Cancelled);
            }
            decision = rx => decision.unwrap_or(ApprovalDecision::Reject),
        };

        match decision {
            ApprovalDecision::Once | ApprovalDecision::Always => Ok(()),
            ApprovalDecision::Reject => Err(ToolError::Rejected {
                message: "The user rejected this tool call. Stop repeating it and wait for further instructions.".into(),
            }),
        }
    }

    /// Answer a pending request. Returns `false` if it is not pending.
    pub fn respond(&self, permission_id: &PermissionId, decision: ApprovalDecision) -> bool {
        let Some(pending) = self.pending.lock().remove(permission_id) else {
            return false;
        };
        let session_id = pending.request.session_id.clone();
        if decision == ApprovalDecision::Always {
            let _ = self
                .always
                .entry(session_id.clone())
                .or_default()
                .insert(pending.request.tool.clone());
        }
        let _ = self.bus.publish(BusEvent::PermissionReplied {
            session_id,
            permission_id: permission_id.clone(),
            response: decision.as_str().to_owned(),
        });
        pending.reply.send(decision).is_ok()
    }

    /// Outstanding requests for a session.
    pub fn pending(&self, session_id: &SessionId) -> Vec<PermissionRequest> {
        self.pending
            .lock()
            .values()
            .filter(|p| &p.request.session_id == session_id)
            .map(|p| p.request.clone())
            .collect()
    }

    /// Forget remembered `always` approvals for a session.
    pub fn forget(&self, session_id: &SessionId) {
        let _ = self.always.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use helm_core::ids::MessageId;
    use serde_json::json;

    fn request(session: &str, tool: &str) -> PermissionRequest {
        PermissionRequest {
            id: PermissionId::new(),
            kind: "doom_loop".into(),
            session_id: SessionId::from(session),
            message_id: MessageId::from("msg_1"),
            call_id: "c1".into(),
            tool: tool.into(),
            title: "repeated call".into(),
            metadata: json!({}),
        }
    }

    async fn next_request(rx: &mut tokio::sync::broadcast::Receiver<BusEvent>) -> PermissionRequest {
        loop {
            if let BusEvent::PermissionAsked(request) = rx.recv().await.unwrap() {
                return request;
            }
        }
    }

    #[tokio::test]
    async fn once_resumes_the_waiting_call() {
        let bus = Arc::new(EventBus::new());
        let gate = Arc::new(ApprovalGate::new(Arc::clone(&bus)));
        let mut rx = bus.subscribe();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.ask(request("ses_1", "read"), &CancellationToken::new()).await })
        };
        let asked = next_request(&mut rx).await;
        assert_eq!(gate.pending(&SessionId::from("ses_1")).len(), 1);
        assert!(gate.respond(&asked.id, ApprovalDecision::Once));
        assert!(waiter.await.unwrap().is_ok());
        assert!(gate.pending(&SessionId::from("ses_1")).is_empty());
    }

    #[tokio::test]
    async fn reject_returns_rejected() {
        let bus = Arc::new(EventBus::new());
        let gate = Arc::new(ApprovalGate::new(Arc::clone(&bus)));
        let mut rx = bus.subscribe();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.ask(request("ses_1", "read"), &CancellationToken::new()).await })
        };
        let asked = next_request(&mut rx).await;
        let _ = gate.respond(&asked.id, ApprovalDecision::Reject);
        assert_matches!(waiter.await.unwrap(), Err(ToolError::Rejected { .. }));
    }

    #[tokio::test]
    async fn always_is_remembered_per_session_and_tool() {
        let bus = Arc::new(EventBus::new());
        let gate = Arc::new(ApprovalGate::new(Arc::clone(&bus)));
        let mut rx = bus.subscribe();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.ask(request("ses_1", "read"), &CancellationToken::new()).await })
        };
        let asked = next_request(&mut rx).await;
        let _ = gate.respond(&asked.id, ApprovalDecision::Always);
        waiter.await.unwrap().unwrap();

        gate.ask(request("ses_1", "read"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(gate.pending(&SessionId::from("ses_2")).is_empty());
    }

    #[tokio::test]
    async fn cancellation_releases_the_wait() {
        let gate = ApprovalGate::new(Arc::new(EventBus::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_matches!(
            gate.ask(request("ses_1", "read"), &cancel).await,
            Err(ToolError::Cancelled)
        );
        assert!(gate.pending(&SessionId::from("ses_1")).is_empty());
    }

    #[test]
    fn respond_to_unknown_request() {
        let gate = ApprovalGate::new(Arc::new(EventBus::new()));
        assert!(!gate.respond(&PermissionId::new(), ApprovalDecision::Once));
    }
}
