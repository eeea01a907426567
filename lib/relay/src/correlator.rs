//! Tool-call correlation.
//!
//! Each outstanding tool call is a oneshot keyed by its correlation id.
//! Whoever removes the entry from the pending map owns the outcome: a
//! resolver that finds it gets to deliver the result, a waiter whose
//! deadline fires first gets `TimedOut`. Exactly one of them wins, so every
//! request produces exactly one outcome.

use crate::error::ToolCallError;
use crate::tool::ToolResult;
use crate::wire::OutboundMessage;
use callrelay_core::CorrelationId;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// A tool invocation requested by the upstream agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub correlation_id: CorrelationId,
    pub tool_name: String,
    pub arguments: JsonValue,
    pub issued_at: DateTime<Utc>,
}

impl ToolCallRequest {
    #[must_use]
    pub fn new(correlation_id: CorrelationId, tool_name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            correlation_id,
            tool_name: tool_name.into(),
            arguments,
            issued_at: Utc::now(),
        }
    }
}

/// How a pending tool call finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(ToolResult),
    TimedOut,
    /// The conversation ended first.
    Cancelled,
}

impl ToolOutcome {
    /// Builds the upstream reply, if one is owed.
    #[must_use]
    pub fn into_reply(self, correlation_id: CorrelationId) -> Option<OutboundMessage> {
        let result = match self {
            Self::Completed(result) => result,
            Self::TimedOut => ToolResult::failure("tool call timed out"),
            Self::Cancelled => return None,
        };
        let (payload, is_error) = result.into_payload();
        Some(OutboundMessage::ToolResult {
            correlation_id,
            payload,
            is_error,
        })
    }
}

#[derive(Debug)]
struct PendingEntry {
    tool_name: String,
    resolve: oneshot::Sender<ToolResult>,
}

type PendingMap = HashMap<CorrelationId, PendingEntry>;

/// Pending tool calls for one conversation.
#[derive(Debug, Clone, Default)]
pub struct ToolCallCorrelator {
    pending: Arc<Mutex<PendingMap>>,
}

impl ToolCallCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request; the returned handle resolves within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolCallError::AlreadyPending`] if the correlation id is in
    /// use.
    pub fn register(&self, request: &ToolCallRequest, timeout: Duration) -> Result<PendingToolCall, ToolCallError> {
        let mut pending = self.lock();
        if pending.contains_key(&request.correlation_id) {
            return Err(ToolCallError::AlreadyPending {
                correlation_id: request.correlation_id.clone(),
            });
        }

        let (resolve, receiver) = oneshot::channel();
        pending.insert(
            request.correlation_id.clone(),
            PendingEntry {
                tool_name: request.tool_name.clone(),
                resolve,
            },
        );

        Ok(PendingToolCall {
            correlation_id: request.correlation_id.clone(),
            receiver,
            timeout,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Delivers a result. Returns false, and discards the result, if the
    /// call already completed, timed out, or was never registered.
    pub fn resolve(&self, correlation_id: &CorrelationId, result: ToolResult) -> bool {
        let mut pending = self.lock();
        let Some(entry) = pending.remove(correlation_id) else {
            debug!(correlation_id = %correlation_id, "discarding late or unknown tool result");
            return false;
        };
        // Sent under the lock so a waiter that loses the race finds it.
        let delivered = entry.resolve.send(result).is_ok();
        if !delivered {
            debug!(correlation_id = %correlation_id, tool_name = entry.tool_name, "tool call waiter is gone");
        }
        delivered
    }

    /// Cancels every pending call.
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.lock();
        let cancelled = pending.len();
        pending.clear();
        cancelled
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.lock().contains_key(correlation_id)
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waiting side of a registered tool call.
#[derive(Debug)]
pub struct PendingToolCall {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<ToolResult>,
    timeout: Duration,
    pending: Arc<Mutex<PendingMap>>,
}

impl PendingToolCall {
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Waits for the result, the deadline, or cancellation.
    pub async fn wait(self) -> ToolOutcome {
        let Self {
            correlation_id,
            mut receiver,
            timeout,
            pending,
        } = self;

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(result)) => ToolOutcome::Completed(result),
            Ok(Err(_)) => ToolOutcome::Cancelled,
            Err(_) => {
                let removed = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&correlation_id)
                    .is_some();
                if removed {
                    debug!(correlation_id = %correlation_id, "tool call timed out");
                    return ToolOutcome::TimedOut;
                }
                match receiver.try_recv() {
                    Ok(result) => ToolOutcome::Completed(result),
                    Err(_) => ToolOutcome::Cancelled,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(CorrelationId::new(id).unwrap(), "search_catalog", json!({"q": "boots"}))
    }

    #[tokio::test]
    async fn resolution_completes_the_wait() {
        let correlator = ToolCallCorrelator::new();
        let pending = correlator.register(&request("evt1"), Duration::from_secs(10)).unwrap();

        assert!(correlator.resolve(
            &CorrelationId::new("evt1").unwrap(),
            ToolResult::success(json!({"hits": 3}))
        ));

        assert_eq!(
            pending.wait().await,
            ToolOutcome::Completed(ToolResult::success(json!({"hits": 3})))
        );
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn second_resolution_is_dropped() {
        let correlator = ToolCallCorrelator::new();
        let id = CorrelationId::new("evt1").unwrap();
        let pending = correlator.register(&request("evt1"), Duration::from_secs(10)).unwrap();

        assert!(correlator.resolve(&id, ToolResult::success(json!(1))));
        assert!(!correlator.resolve(&id, ToolResult::success(json!(2))));

        assert_eq!(
            pending.wait().await,
            ToolOutcome::Completed(ToolResult::success(json!(1)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_produces_timeout_and_late_result_is_dropped() {
        let correlator = ToolCallCorrelator::new();
        let id = CorrelationId::new("evt2").unwrap();
        let pending = correlator.register(&request("evt2"), Duration::from_secs(10)).unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(pending.wait().await, ToolOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(10));

        assert!(!correlator.is_pending(&id));
        assert!(!correlator.resolve(&id, ToolResult::success(json!("late"))));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let correlator = ToolCallCorrelator::new();
        let _pending = correlator.register(&request("evt1"), Duration::from_secs(10)).unwrap();

        assert!(matches!(
            correlator.register(&request("evt1"), Duration::from_secs(10)),
            Err(ToolCallError::AlreadyPending { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_all_cancels_waiters() {
        let correlator = ToolCallCorrelator::new();
        let first = correlator.register(&request("a"), Duration::from_secs(10)).unwrap();
        let second = correlator.register(&request("b"), Duration::from_secs(10)).unwrap();

        assert_eq!(correlator.cancel_all(), 2);
        assert_eq!(first.wait().await, ToolOutcome::Cancelled);
        assert_eq!(second.wait().await, ToolOutcome::Cancelled);
    }

    #[test]
    fn outcomes_map_to_replies() {
        let id = CorrelationId::new("evt1").unwrap();

        let reply = ToolOutcome::TimedOut.into_reply(id.clone()).unwrap();
        assert!(matches!(reply, OutboundMessage::ToolResult { is_error: true, .. }));

        let reply = ToolOutcome::Completed(ToolResult::success(json!({"ok": true})))
            .into_reply(id.clone())
            .unwrap();
        assert_eq!(
            reply,
            OutboundMessage::ToolResult {
                correlation_id: id.clone(),
                payload: json!({"ok": true}),
                is_error: false,
            }
        );

        assert_eq!(ToolOutcome::Cancelled.into_reply(id), None);
    }
}
