use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{CoreError, Document};

pub mod garden;
pub mod shopping;
pub mod task;
pub mod week;
pub mod workspace;

pub use garden::{Garden, Issue, VisitLog, Weekday};
pub use shopping::ShoppingItem;
pub use task::{Task, TaskLevel};
pub use week::WeekPlan;
pub use workspace::{JoinRequest, JoinRequestStatus, Member, MemberRole, Workspace};

/// A typed record backed by one document collection. Decoding happens once at
/// the subscription boundary; the store's untyped shape is never passed on.
pub trait Entity: Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn from_document(doc: &Document) -> Result<Self, CoreError>;

    /// The owning tenant, if the record carries one. Scoped subscriptions
    /// rely on this for the leakage checks in tests.
    fn tenant_id(&self) -> Option<&str>;
}

/// Decode a document's fields into a typed record, injecting the document id
/// under `id` so records carry their own identity.
pub(crate) fn decode_document<T: DeserializeOwned>(
    collection: &str,
    doc: &Document,
) -> Result<T, CoreError> {
    let mut fields = doc.fields.clone();
    fields.insert("id".to_string(), Value::String(doc.id.clone()));
    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        CoreError::Deserialization(format!("{}/{}: {}", collection, doc.id, e))
    })
}

/// Locale-aware-ish name ordering: case-insensitive, with the raw strings as
/// a tiebreak so equal-folded names still order deterministically. Hebrew and
/// other non-Latin scripts order by code point, which matches their alphabets.
pub fn name_cmp(a: &str, b: &str) -> Ordering {
    let folded = a.to_lowercase().cmp(&b.to_lowercase());
    folded.then_with(|| a.cmp(b))
}
