use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

// Declare modules
pub mod adapters;
pub mod domain;

// Define a common error type for the core library
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Access denied")]
    AccessDenied,
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Subscription failed: {0}")]
    Subscription(String),
    #[error("Write rejected: {0}")]
    WriteRejected(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Deserialization(err.to_string())
    }
}

/// The authenticated user as reported by the identity capability.
/// Read-only to this system; created and destroyed by the external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: String,
    pub display_name: String,
}

/// A single document as delivered by the store: an opaque id plus a JSON
/// object of fields. Typed records are decoded from this at the subscription
/// boundary, never trusted as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: serde_json::Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: serde_json::Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Server-side filter predicate for a collection subscription. The store only
/// delivers documents matching the filter; anything finer-grained is filtered
/// client-side by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    FieldEquals { field: String, value: Value },
    And(Vec<Filter>),
}

impl Filter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::FieldEquals { field, value } => doc.field(field) == Some(value),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}

/// One notification on a live collection subscription. A snapshot is a
/// complete replacement of the previous result set, not a diff.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    Snapshot(Vec<Document>),
    Error(String),
}

/// One notification on a live single-document subscription.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    Snapshot(Option<Document>),
    Error(String),
}

/// Detaches the subscriber from the store when cancelled or dropped. Failing
/// to drop this guard leaks a listener registration in the store.
pub struct SubscriptionGuard {
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Explicitly tear down the subscription. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(f) = self.on_cancel.take() {
            f();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("active", &self.on_cancel.is_some())
            .finish()
    }
}

/// Handle for a live collection subscription: the event stream plus its
/// cancellation guard. The first event is always the initial snapshot.
#[derive(Debug)]
pub struct CollectionSubscription {
    pub events: mpsc::UnboundedReceiver<CollectionEvent>,
    pub guard: SubscriptionGuard,
}

/// Handle for a live single-document subscription.
#[derive(Debug)]
pub struct DocumentSubscription {
    pub events: mpsc::UnboundedReceiver<DocumentEvent>,
    pub guard: SubscriptionGuard,
}

// Port for the remote document store capability. Live queries deliver an
// initial snapshot and then a full-snapshot update whenever any matching
// document changes; writes are async and fallible.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn subscribe_collection(&self, collection: &str, filter: Filter) -> CollectionSubscription;

    fn subscribe_document(&self, collection: &str, id: &str) -> DocumentSubscription;

    /// One-shot read, used for read-modify-write actions on embedded records.
    async fn fetch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, CoreError>;

    /// Create a document; the store assigns and returns the id.
    async fn add_document(
        &self,
        collection: &str,
        fields: serde_json::Map<String, Value>,
    ) -> Result<String, CoreError>;

    /// Merge the given fields into an existing document (last write wins at
    /// field granularity; conflict resolution is the store's concern).
    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: serde_json::Map<String, Value>,
    ) -> Result<(), CoreError>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), CoreError>;
}

// Port for the identity capability. The watch channel always holds the
// current principal (or None when signed out); consumers react to changes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn principal(&self) -> watch::Receiver<Option<Principal>>;

    async fn sign_out(&self) -> Result<(), CoreError>;
}

// Port for the persisted UI preference store (active workspace id survives
// restarts). Single string key-value semantics.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        match fields {
            Value::Object(map) => Document::new(id, map),
            _ => panic!("fields must be an object"),
        }
    }

    #[test]
    fn filter_all_matches_everything() {
        let d = doc("g1", json!({"tenantId": "t1"}));
        assert!(Filter::All.matches(&d));
    }

    #[test]
    fn filter_field_equals() {
        let d = doc("g1", json!({"tenantId": "t1", "name": "rose"}));
        assert!(Filter::field_equals("tenantId", "t1").matches(&d));
        assert!(!Filter::field_equals("tenantId", "t2").matches(&d));
        // Absent field never matches
        assert!(!Filter::field_equals("userId", "u1").matches(&d));
    }

    #[test]
    fn filter_and_requires_all() {
        let d = doc("w1", json!({"tenantId": "t1", "userId": "u1"}));
        let both = Filter::And(vec![
            Filter::field_equals("tenantId", "t1"),
            Filter::field_equals("userId", "u1"),
        ]);
        let wrong_user = Filter::And(vec![
            Filter::field_equals("tenantId", "t1"),
            Filter::field_equals("userId", "u2"),
        ]);
        assert!(both.matches(&d));
        assert!(!wrong_user.matches(&d));
    }

    #[test]
    fn guard_cancel_is_idempotent() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let mut guard = SubscriptionGuard::new(move || {
            let _ = tx.send(());
        });
        guard.cancel();
        guard.cancel();
        drop(guard);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
