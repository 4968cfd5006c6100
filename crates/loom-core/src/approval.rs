//! Approval Gateway (spec §4.4, component D).

use crate::ui::UiBridge;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprovePolicy {
    pub shell: bool,
    pub edits: bool,
}

enum Waiter {
    Approval(oneshot::Sender<bool>),
    Choice(oneshot::Sender<usize>),
}

/// Blocks tool calls that require a human decision. Each outstanding
/// request is a one-shot waiter keyed by the tool call id; a resolution
/// for an unknown id is silently dropped (spec §4.4 invariants).
#[derive(Default)]
pub struct ApprovalGateway {
    waiters: Mutex<HashMap<String, Waiter>>,
    policy: Mutex<AutoApprovePolicy>,
}

impl ApprovalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_policy(&self, policy: AutoApprovePolicy) {
        *self.policy.lock() = policy;
    }

    pub fn policy(&self) -> AutoApprovePolicy {
        *self.policy.lock()
    }

    /// Blocking approval request. `None` if the turn's context is cancelled
    /// before a decision arrives ("operation stopped" path, spec §4.1).
    pub async fn user_approved(
        &self,
        ui: &dyn UiBridge,
        action_id: &str,
        summary: &str,
        diff: Option<&str>,
        cancel: &CancellationToken,
    ) -> Option<bool> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .insert(action_id.to_string(), Waiter::Approval(tx));
        ui.prompt_approval(action_id, summary, diff).await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.waiters.lock().remove(action_id);
                None
            }
            result = rx => result.ok(),
        }
    }

    /// Blocking choice request; returns the selected option's index.
    pub async fn user_choice(
        &self,
        ui: &dyn UiBridge,
        action_id: &str,
        question: &str,
        options: &[String],
        cancel: &CancellationToken,
    ) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .insert(action_id.to_string(), Waiter::Choice(tx));
        ui.prompt_choice(action_id, question, options).await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.waiters.lock().remove(action_id);
                None
            }
            result = rx => result.ok(),
        }
    }

    /// Deliver a human approval decision. A resolve for an unknown or
    /// already-delivered id is a no-op (spec §8 boundary behavior).
    pub fn resolve_approval(&self, action_id: &str, approved: bool) {
        if let Some(Waiter::Approval(tx)) = self.waiters.lock().remove(action_id) {
            let _ = tx.send(approved);
        }
    }

    pub fn resolve_choice(&self, action_id: &str, index: usize) {
        if let Some(Waiter::Choice(tx)) = self.waiters.lock().remove(action_id) {
            let _ = tx.send(index);
        }
    }
}

pub type SharedApprovalGateway = Arc<ApprovalGateway>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::NullUiBridge;

    #[tokio::test]
    async fn double_resolve_is_noop() {
        let gw = ApprovalGateway::new();
        let cancel = CancellationToken::new();
        let gw = Arc::new(gw);
        let gw2 = gw.clone();
        let handle = tokio::spawn(async move {
            gw2.user_approved(&NullUiBridge, "a1", "do it", None, &CancellationToken::new())
                .await
        });
        // give the waiter a chance to register
        tokio::task::yield_now().await;
        gw.resolve_approval("a1", true);
        gw.resolve_approval("a1", false); // no-op, waiter already removed
        assert_eq!(handle.await.unwrap(), Some(true));
        let _ = cancel;
    }

    #[tokio::test]
    async fn unknown_id_resolution_is_dropped() {
        let gw = ApprovalGateway::new();
        gw.resolve_approval("never-registered", true);
        gw.resolve_choice("never-registered", 0);
    }

    #[tokio::test]
    async fn cancellation_unblocks_waiter() {
        let gw = Arc::new(ApprovalGateway::new());
        let cancel = CancellationToken::new();
        let gw2 = gw.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            gw2.user_approved(&NullUiBridge, "a2", "do it", None, &cancel2)
                .await
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), None);
    }
}
