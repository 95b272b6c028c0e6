//! Remote Store Adapter contract.
//!
//! # Responsibility
//! - Describe the optional shared document store consumed by the sync
//!   coordinator: anonymous identity, get/set of one JSON document and a
//!   change subscription.
//!
//! # Invariants
//! - Implementations never panic on backend failure; every failure is a
//!   `RemoteError`.
//! - A `Subscription` stops delivering once cancelled or dropped.

use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Remote document payload.
pub type Document = serde_json::Value;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote store failures. Degrade sync, never the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Anonymous identity could not be established.
    Identity(String),
    /// Backend unreachable or refused the request.
    Unavailable(String),
    /// Call exceeded the configured remote timeout.
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },
    /// Backend answered with something unusable.
    Backend(String),
}

impl RemoteError {
    /// Stable short code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity_failed",
            Self::Unavailable(_) => "remote_unavailable",
            Self::Timeout { .. } => "remote_timeout",
            Self::Backend(_) => "remote_backend",
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity(message) => write!(f, "remote identity failed: {message}"),
            Self::Unavailable(message) => write!(f, "remote store unavailable: {message}"),
            Self::Timeout {
                operation,
                after_ms,
            } => write!(f, "remote {operation} timed out after {after_ms} ms"),
            Self::Backend(message) => write!(f, "remote store error: {message}"),
        }
    }
}

impl Error for RemoteError {}

/// Anonymous identity granted by the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub uid: Uuid,
}

/// One notification delivered by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// Current document content; `None` when the document does not exist.
    Snapshot(Option<Document>),
    /// The listener failed; the subscription may or may not keep going.
    Failed(RemoteError),
}

/// Cancelable handle for a document change feed.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<RemoteChange>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps a change feed whose producer stops once the receiver is gone.
    pub fn new(receiver: mpsc::UnboundedReceiver<RemoteChange>) -> Self {
        Self {
            receiver,
            on_cancel: None,
        }
    }

    /// Wraps a change feed with an explicit producer teardown hook.
    pub fn with_cancel(
        receiver: mpsc::UnboundedReceiver<RemoteChange>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Waits for the next change. `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<RemoteChange> {
        self.receiver.recv().await
    }

    /// Returns an already-delivered change without waiting.
    pub fn try_next(&mut self) -> Option<RemoteChange> {
        self.receiver.try_recv().ok()
    }

    /// Stops the feed.
    pub fn cancel(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.receiver.close();
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Shared document store capability.
///
/// `collection` and `document_id` are fixed configuration values; the
/// coordinator only ever addresses one document.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Stable backend identifier for logs (e.g. `memory`, `dir`).
    fn backend_id(&self) -> &str;

    /// Establishes the anonymous identity. Idempotent.
    async fn establish_identity(&self) -> RemoteResult<RemoteIdentity>;

    async fn get(&self, collection: &str, document_id: &str) -> RemoteResult<Option<Document>>;

    /// Replaces the whole document.
    async fn set(
        &self,
        collection: &str,
        document_id: &str,
        document: Document,
    ) -> RemoteResult<()>;

    /// Starts a change feed for one document.
    ///
    /// The first notification carries the document as it is at subscription
    /// time.
    async fn subscribe(&self, collection: &str, document_id: &str) -> RemoteResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::{RemoteChange, RemoteError, Subscription};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn dropping_subscription_runs_cancel_hook_and_closes_feed() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let subscription = Subscription::with_cancel(receiver, move || {
            flag.store(true, Ordering::SeqCst);
        });
        drop(subscription);

        assert!(cancelled.load(Ordering::SeqCst));
        assert!(sender.send(RemoteChange::Snapshot(None)).is_err());
    }

    #[test]
    fn try_next_returns_buffered_changes_in_order() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(receiver);
        sender
            .send(RemoteChange::Snapshot(None))
            .expect("send snapshot");
        sender
            .send(RemoteChange::Failed(RemoteError::Unavailable(
                "offline".to_string(),
            )))
            .expect("send failure");

        assert_eq!(subscription.try_next(), Some(RemoteChange::Snapshot(None)));
        assert!(matches!(
            subscription.try_next(),
            Some(RemoteChange::Failed(RemoteError::Unavailable(_)))
        ));
        assert_eq!(subscription.try_next(), None);
    }
}
