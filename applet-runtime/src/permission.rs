//! Permission gate for remote calls
//!
//! Every remote call passes through the gate before it reaches the call
//! bridge. The gate keeps a session-scoped set of "always allow" keys and
//! asks the embedding UI, through a [`PermissionPrompt`], about anything it
//! has not seen yet. Nothing here is persisted: a fresh host re-prompts for
//! everything.

use applet_types::{CallMode, CallSpec, Decision, PermissionKey};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Appended to argument previews that were cut short.
pub const TRUNCATION_MARKER: &str = "…";

/// Truncate `args` to at most `max_chars` characters.
pub fn preview_args(args: &str, max_chars: usize) -> String {
    match args.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &args[..cut], TRUNCATION_MARKER),
        None => args.to_string(),
    }
}

/// What the user is shown for one call
#[derive(Debug, Clone, PartialEq)]
pub struct CallSummary {
    pub key: PermissionKey,
    pub args_preview: String,
}

impl CallSummary {
    pub fn new(call: &CallSpec, preview_chars: usize) -> Self {
        Self {
            key: call.permission_key(),
            args_preview: preview_args(&call.args, preview_chars),
        }
    }

    pub fn authenticated(&self) -> bool {
        self.key.authenticated
    }

    pub fn mode(&self) -> CallMode {
        self.key.mode
    }
}

impl fmt::Display for CallSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} :: {} {}",
            if self.key.authenticated {
                "authenticated"
            } else {
                "anonymous"
            },
            self.key.mode,
            self.key.canister_id,
            self.key.method,
            self.args_preview
        )
    }
}

/// One confirmation surface, listing every call awaiting approval
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub calls: Vec<CallSummary>,
}

/// Asks the user to approve remote calls
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn confirm(&self, request: PermissionRequest) -> Decision;
}

/// Answers every prompt with the same decision
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub Decision);

#[async_trait]
impl PermissionPrompt for FixedPrompt {
    async fn confirm(&self, _request: PermissionRequest) -> Decision {
        self.0
    }
}

/// A prompt waiting for the embedding UI to answer
#[derive(Debug)]
pub struct PendingPrompt {
    pub request: PermissionRequest,
    reply: oneshot::Sender<Decision>,
}

impl PendingPrompt {
    pub fn respond(self, decision: Decision) {
        // The gate may already have given up on this prompt.
        let _ = self.reply.send(decision);
    }
}

/// Forwards prompts to the embedding UI over a channel.
///
/// Dropping a [`PendingPrompt`] without answering (the user navigated
/// away) or letting the optional timeout elapse counts as [`Decision::Deny`].
#[derive(Debug, Clone)]
pub struct ChannelPrompt {
    tx: mpsc::UnboundedSender<PendingPrompt>,
    timeout: Option<Duration>,
}

impl ChannelPrompt {
    pub fn new(timeout: Option<Duration>) -> (Self, mpsc::UnboundedReceiver<PendingPrompt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, timeout }, rx)
    }
}

#[async_trait]
impl PermissionPrompt for ChannelPrompt {
    async fn confirm(&self, request: PermissionRequest) -> Decision {
        let (reply, answer) = oneshot::channel();
        if self.tx.send(PendingPrompt { request, reply }).is_err() {
            tracing::warn!("Permission prompt has no listener, denying");
            return Decision::Deny;
        }

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, answer).await {
                Ok(answer) => answer,
                Err(_) => {
                    tracing::warn!("Permission prompt timed out after {:?}, denying", limit);
                    return Decision::Deny;
                }
            },
            None => answer.await,
        };

        answer.unwrap_or_else(|_| {
            tracing::debug!("Permission prompt cancelled, denying");
            Decision::Deny
        })
    }
}

/// Session-scoped allow cache plus prompting logic.
///
/// Clones share the same cache, so an embedder can inspect or clear grants
/// while the host owns the gate.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    granted: Arc<RwLock<HashSet<PermissionKey>>>,
    preview_chars: usize,
}

impl PermissionGate {
    pub fn new(preview_chars: usize) -> Self {
        Self {
            granted: Arc::new(RwLock::new(HashSet::new())),
            preview_chars,
        }
    }

    pub fn is_granted(&self, key: &PermissionKey) -> bool {
        self.granted.read().contains(key)
    }

    pub fn grant(&self, key: PermissionKey) {
        self.granted.write().insert(key);
    }

    /// Keys marked "always allow", in display order
    pub fn granted(&self) -> Vec<PermissionKey> {
        let mut keys: Vec<_> = self.granted.read().iter().cloned().collect();
        keys.sort_by_key(|k| k.to_string());
        keys
    }

    pub fn revoke_all(&self) {
        self.granted.write().clear();
    }

    /// Decide whether a single call may run.
    ///
    /// A cached key short-circuits to `AllowAlways` without prompting.
    pub async fn authorize(&self, call: &CallSpec, prompt: &dyn PermissionPrompt) -> Decision {
        let key = call.permission_key();
        if self.is_granted(&key) {
            tracing::debug!(%key, "Permission cached");
            return Decision::AllowAlways;
        }

        let request = PermissionRequest {
            calls: vec![CallSummary::new(call, self.preview_chars)],
        };
        let decision = prompt.confirm(request).await;
        self.record(decision, std::iter::once(key));
        decision
    }

    /// Decide a whole batch with at most one prompt.
    ///
    /// Only calls whose key is not cached are listed, once per key. Returns
    /// one approval flag per input call, in order.
    pub async fn authorize_batch(
        &self,
        calls: &[&CallSpec],
        prompt: &dyn PermissionPrompt,
    ) -> Vec<bool> {
        let pending: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, call)| !self.is_granted(&call.permission_key()))
            .map(|(i, _)| i)
            .collect();

        let mut approved = vec![true; calls.len()];
        if pending.is_empty() {
            return approved;
        }

        let mut keys = HashSet::new();
        let request = PermissionRequest {
            calls: pending
                .iter()
                .filter(|&&i| keys.insert(calls[i].permission_key()))
                .map(|&i| CallSummary::new(calls[i], self.preview_chars))
                .collect(),
        };
        let decision = prompt.confirm(request).await;
        self.record(decision, keys.into_iter());

        if !decision.allows() {
            for i in pending {
                approved[i] = false;
            }
        }
        approved
    }

    fn record(&self, decision: Decision, keys: impl Iterator<Item = PermissionKey>) {
        match decision {
            Decision::AllowAlways => {
                let mut granted = self.granted.write();
                for key in keys {
                    tracing::info!(%key, "Permission granted for session");
                    granted.insert(key);
                }
            }
            Decision::AllowOnce => tracing::debug!("Permission granted once"),
            Decision::Deny => tracing::warn!("Permission denied"),
        }
    }
}
