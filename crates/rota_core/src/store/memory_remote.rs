//! In-process remote document store.
//!
//! Clones share one document map, so two coordinators holding clones behave
//! like two devices on the same shared document. Every `set` is fanned out
//! to live subscribers of that document, the writer's own feed included.

use crate::store::remote::{
    Document, RemoteChange, RemoteIdentity, RemoteResult, RemoteStore, Subscription,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

type DocumentKey = (String, String);

#[derive(Default)]
struct MemoryRemoteInner {
    identity: Option<Uuid>,
    documents: BTreeMap<DocumentKey, Document>,
    subscribers: Vec<(DocumentKey, mpsc::UnboundedSender<RemoteChange>)>,
}

/// Shared in-memory document store.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<MemoryRemoteInner>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored document without going through the async contract.
    pub fn document(&self, collection: &str, document_id: &str) -> Option<Document> {
        self.lock()
            .documents
            .get(&document_key(collection, document_id))
            .cloned()
    }

    /// Number of feeds still attached to any document.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|(_, sender)| !sender.is_closed());
        inner.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRemoteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn backend_id(&self) -> &str {
        "memory"
    }

    async fn establish_identity(&self) -> RemoteResult<RemoteIdentity> {
        let mut inner = self.lock();
        let uid = *inner.identity.get_or_insert_with(Uuid::new_v4);
        Ok(RemoteIdentity { uid })
    }

    async fn get(&self, collection: &str, document_id: &str) -> RemoteResult<Option<Document>> {
        Ok(self.document(collection, document_id))
    }

    async fn set(
        &self,
        collection: &str,
        document_id: &str,
        document: Document,
    ) -> RemoteResult<()> {
        let key = document_key(collection, document_id);
        let mut inner = self.lock();
        inner.documents.insert(key.clone(), document.clone());
        inner.subscribers.retain(|(subscribed, sender)| {
            if *subscribed != key {
                return !sender.is_closed();
            }
            sender
                .send(RemoteChange::Snapshot(Some(document.clone())))
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self, collection: &str, document_id: &str) -> RemoteResult<Subscription> {
        let key = document_key(collection, document_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let current = inner.documents.get(&key).cloned();
        // Receiver is alive, the initial snapshot cannot fail.
        let _ = sender.send(RemoteChange::Snapshot(current));
        inner.subscribers.push((key, sender));
        Ok(Subscription::new(receiver))
    }
}

fn document_key(collection: &str, document_id: &str) -> DocumentKey {
    (collection.to_string(), document_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::MemoryRemoteStore;
    use crate::store::remote::{RemoteChange, RemoteStore};
    use serde_json::json;

    #[tokio::test]
    async fn identity_is_stable_across_calls_and_clones() {
        let store = MemoryRemoteStore::new();
        let first = store.establish_identity().await.expect("identity");
        let second = store.clone().establish_identity().await.expect("identity");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn subscribers_get_initial_snapshot_and_later_writes() {
        let store = MemoryRemoteStore::new();
        let mut feed = store.subscribe("schedules", "main").await.expect("subscribe");
        assert_eq!(feed.try_next(), Some(RemoteChange::Snapshot(None)));

        let other = store.clone();
        other
            .set("schedules", "main", json!({"people": ["Anna"]}))
            .await
            .expect("set");
        other
            .set("schedules", "other", json!({"people": ["Ben"]}))
            .await
            .expect("set other document");

        assert_eq!(
            feed.try_next(),
            Some(RemoteChange::Snapshot(Some(json!({"people": ["Anna"]}))))
        );
        assert_eq!(feed.try_next(), None);
    }

    #[tokio::test]
    async fn dropped_feeds_are_pruned() {
        let store = MemoryRemoteStore::new();
        let feed = store.subscribe("schedules", "main").await.expect("subscribe");
        assert_eq!(store.subscriber_count(), 1);

        drop(feed);
        assert_eq!(store.subscriber_count(), 0);
    }
}
