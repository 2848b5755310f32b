use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    CollectionEvent, CollectionSubscription, CoreError, Document, DocumentEvent,
    DocumentStore, DocumentSubscription, Filter, SubscriptionGuard,
};

/// In-memory implementation of the DocumentStore port using DashMap document
/// tables and per-subscriber mpsc channels. Suitable for tests and the
/// single-executable worker.
///
/// Live-query semantics match the remote store: a subscriber gets the current
/// matching set immediately, then a complete replacement snapshot after every
/// mutation that touches its collection. Snapshot order is insertion order;
/// consumers needing a different order sort client-side.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    // Collection name -> document id -> stored document.
    collections: DashMap<String, DashMap<String, StoredDoc>>,
    collection_subs: DashMap<u64, CollectionSub>,
    document_subs: DashMap<u64, DocumentSub>,
    next_sub_id: AtomicU64,
    next_seq: AtomicU64,
    fail_writes: AtomicBool,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    // Monotonic insertion sequence; snapshots replay in this order.
    seq: u64,
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug)]
struct CollectionSub {
    collection: String,
    filter: Filter,
    tx: mpsc::UnboundedSender<CollectionEvent>,
}

#[derive(Debug)]
struct DocumentSub {
    collection: String,
    id: String,
    tx: mpsc::UnboundedSender<DocumentEvent>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document with a fixed id. Test and demo setup only.
    pub fn seed(&self, collection: &str, id: &str, fields: serde_json::Map<String, Value>) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), StoredDoc { seq, fields });
        self.inner.notify_collection(collection);
        self.inner.notify_document(collection, id);
    }

    /// Deliver a transport error to every live subscription on `collection`.
    /// Simulates the remote store reporting a permission/transport failure.
    pub fn fail_collection_subscriptions(&self, collection: &str, message: &str) {
        for entry in self.inner.collection_subs.iter() {
            if entry.value().collection == collection {
                let _ = entry
                    .value()
                    .tx
                    .send(CollectionEvent::Error(message.to_string()));
            }
        }
    }

    /// When set, every write is rejected with `CoreError::WriteRejected`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live collection subscriptions; leak checks in tests.
    pub fn collection_subscription_count(&self) -> usize {
        self.inner.collection_subs.len()
    }
}

impl Inner {
    fn snapshot(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        let Some(table) = self.collections.get(collection) else {
            return Vec::new();
        };
        let mut docs: Vec<(u64, Document)> = table
            .iter()
            .map(|entry| {
                (
                    entry.value().seq,
                    Document::new(entry.key().clone(), entry.value().fields.clone()),
                )
            })
            .filter(|(_, doc)| filter.matches(doc))
            .collect();
        docs.sort_by_key(|(seq, _)| *seq);
        docs.into_iter().map(|(_, doc)| doc).collect()
    }

    fn lookup(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|table| table.get(id).map(|d| Document::new(id, d.fields.clone())))
    }

    /// Push a fresh full snapshot to every subscriber of `collection`.
    /// Closed receivers are pruned lazily here.
    fn notify_collection(&self, collection: &str) {
        let mut dead = Vec::new();
        for entry in self.collection_subs.iter() {
            let sub = entry.value();
            if sub.collection != collection {
                continue;
            }
            let snapshot = self.snapshot(collection, &sub.filter);
            if sub.tx.send(CollectionEvent::Snapshot(snapshot)).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.collection_subs.remove(&id);
        }
    }

    fn notify_document(&self, collection: &str, id: &str) {
        let mut dead = Vec::new();
        for entry in self.document_subs.iter() {
            let sub = entry.value();
            if sub.collection != collection || sub.id != id {
                continue;
            }
            let snapshot = self.lookup(collection, id);
            if sub.tx.send(DocumentEvent::Snapshot(snapshot)).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.document_subs.remove(&id);
        }
    }

    fn check_writes(&self) -> Result<(), CoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::WriteRejected("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn subscribe_collection(&self, collection: &str, filter: Filter) -> CollectionSubscription {
        let sub_id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let (tx, events) = mpsc::unbounded_channel();

        // Initial snapshot is delivered before the subscription is registered,
        // so a concurrent mutation can only produce a newer snapshot after it.
        let _ = tx.send(CollectionEvent::Snapshot(
            self.inner.snapshot(collection, &filter),
        ));

        self.inner.collection_subs.insert(
            sub_id,
            CollectionSub {
                collection: collection.to_string(),
                filter,
                tx,
            },
        );
        debug!(collection, sub_id, "collection subscription registered");

        let inner = Arc::clone(&self.inner);
        let guard = SubscriptionGuard::new(move || {
            inner.collection_subs.remove(&sub_id);
        });
        CollectionSubscription { events, guard }
    }

    fn subscribe_document(&self, collection: &str, id: &str) -> DocumentSubscription {
        let sub_id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let (tx, events) = mpsc::unbounded_channel();

        let _ = tx.send(DocumentEvent::Snapshot(self.inner.lookup(collection, id)));

        self.inner.document_subs.insert(
            sub_id,
            DocumentSub {
                collection: collection.to_string(),
                id: id.to_string(),
                tx,
            },
        );

        let inner = Arc::clone(&self.inner);
        let guard = SubscriptionGuard::new(move || {
            inner.document_subs.remove(&sub_id);
        });
        DocumentSubscription { events, guard }
    }

    async fn fetch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, CoreError> {
        Ok(self.inner.lookup(collection, id))
    }

    async fn add_document(
        &self,
        collection: &str,
        fields: serde_json::Map<String, Value>,
    ) -> Result<String, CoreError> {
        self.inner.check_writes()?;
        let id = Uuid::new_v4().to_string();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), StoredDoc { seq, fields });
        self.inner.notify_collection(collection);
        self.inner.notify_document(collection, &id);
        Ok(id)
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: serde_json::Map<String, Value>,
    ) -> Result<(), CoreError> {
        self.inner.check_writes()?;
        {
            let table = self
                .inner
                .collections
                .get(collection)
                .ok_or_else(|| CoreError::NotFound(format!("{collection}/{id}")))?;
            let mut doc = table
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("{collection}/{id}")))?;
            for (key, value) in fields {
                doc.fields.insert(key, value);
            }
        }
        self.inner.notify_collection(collection);
        self.inner.notify_document(collection, id);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), CoreError> {
        self.inner.check_writes()?;
        let removed = self
            .inner
            .collections
            .get(collection)
            .and_then(|table| table.remove(id));
        if removed.is_none() {
            return Err(CoreError::NotFound(format!("{collection}/{id}")));
        }
        self.inner.notify_collection(collection);
        self.inner.notify_document(collection, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    fn fields(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    async fn next_snapshot(sub: &mut CollectionSubscription) -> Vec<Document> {
        let event = timeout(Duration::from_millis(100), sub.events.recv())
            .await
            .expect("subscription timed out")
            .expect("subscription closed");
        match event {
            CollectionEvent::Snapshot(docs) => docs,
            CollectionEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn initial_snapshot_then_updates() {
        let store = InMemoryDocumentStore::new();
        store.seed("gardens", "g1", fields(json!({"tenantId": "t1", "name": "a"})));

        let mut sub = store.subscribe_collection("gardens", Filter::All);
        let initial = next_snapshot(&mut sub).await;
        assert_eq!(initial.len(), 1);

        store
            .add_document("gardens", fields(json!({"tenantId": "t1", "name": "b"})))
            .await
            .unwrap();
        let updated = next_snapshot(&mut sub).await;
        assert_eq!(updated.len(), 2);
    }

    #[tokio::test]
    async fn filter_scopes_snapshots() {
        let store = InMemoryDocumentStore::new();
        store.seed("tasks", "t-a", fields(json!({"tenantId": "A", "title": "x"})));
        store.seed("tasks", "t-b", fields(json!({"tenantId": "B", "title": "y"})));

        let mut sub =
            store.subscribe_collection("tasks", Filter::field_equals("tenantId", "A"));
        let snapshot = next_snapshot(&mut sub).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "t-a");

        // A tenant-B write still triggers a snapshot, but tenant-B documents
        // never appear in it.
        store
            .add_document("tasks", fields(json!({"tenantId": "B", "title": "z"})))
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut sub).await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.iter().all(|d| d.str_field("tenantId") == Some("A")));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = InMemoryDocumentStore::new();
        store.seed("tasks", "t1", fields(json!({"title": "x", "done": false})));

        store
            .update_fields("tasks", "t1", fields(json!({"done": true})))
            .await
            .unwrap();

        let doc = store.fetch_document("tasks", "t1").await.unwrap().unwrap();
        assert_eq!(doc.field("done"), Some(&json!(true)));
        assert_eq!(doc.str_field("title"), Some("x"));
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = InMemoryDocumentStore::new();
        let result = store
            .update_fields("tasks", "nope", fields(json!({"done": true})))
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn document_subscription_sees_delete() {
        let store = InMemoryDocumentStore::new();
        store.seed("gardens", "g1", fields(json!({"name": "a"})));

        let mut sub = store.subscribe_document("gardens", "g1");
        let first = timeout(Duration::from_millis(100), sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, DocumentEvent::Snapshot(Some(_))));

        store.delete_document("gardens", "g1").await.unwrap();
        let second = timeout(Duration::from_millis(100), sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, DocumentEvent::Snapshot(None)));
    }

    #[tokio::test]
    async fn cancel_unregisters_subscription() {
        let store = InMemoryDocumentStore::new();
        let mut sub = store.subscribe_collection("gardens", Filter::All);
        assert_eq!(store.collection_subscription_count(), 1);

        sub.guard.cancel();
        assert_eq!(store.collection_subscription_count(), 0);

        // The already-queued initial snapshot is still readable; nothing new
        // arrives afterwards.
        let _ = next_snapshot(&mut sub).await;
        store
            .add_document("gardens", fields(json!({"name": "late"})))
            .await
            .unwrap();
        let result = timeout(Duration::from_millis(50), sub.events.recv()).await;
        assert!(matches!(result, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn injected_failure_reaches_subscribers() {
        let store = InMemoryDocumentStore::new();
        let mut sub = store.subscribe_collection("tasks", Filter::All);
        let _ = next_snapshot(&mut sub).await;

        store.fail_collection_subscriptions("tasks", "permission denied");
        let event = timeout(Duration::from_millis(100), sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            CollectionEvent::Error(msg) => assert_eq!(msg, "permission denied"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_writes_reject() {
        let store = InMemoryDocumentStore::new();
        store.set_fail_writes(true);
        let result = store
            .add_document("tasks", fields(json!({"title": "x"})))
            .await;
        assert!(matches!(result, Err(CoreError::WriteRejected(_))));
    }
}
