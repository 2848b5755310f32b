use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{decode_document, Entity};
use crate::{CoreError, Document};

/// Working days only; the crews do not visit on Friday or Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
}

/// An attention item embedded inside a garden document. Issues have no
/// collection of their own; they are created and resolved in place, and the
/// synthetic id routes updates back to the parent garden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub garden_id: String,
    #[serde(default)]
    pub garden_name: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitLog {
    pub date: NaiveDate,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub next_visit_tasks: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Garden {
    pub id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub day: Option<Weekday>,
    #[serde(default)]
    pub out_days: Vec<Weekday>,
    #[serde(default, rename = "imageURL")]
    pub image_url: String,
    #[serde(default, rename = "locationURL")]
    pub location_url: String,
    #[serde(default)]
    pub last_visit: Option<NaiveDate>,
    #[serde(default, deserialize_with = "coerce_notes")]
    pub notes: Vec<String>,
    #[serde(default)]
    pub visit_logs: Vec<VisitLog>,
    // Older documents have no requiresAttention field at all; that is an
    // empty issue list, never a decode error.
    #[serde(default)]
    pub requires_attention: Vec<Issue>,
}

impl Garden {
    pub fn unresolved_issues(&self) -> impl Iterator<Item = &Issue> {
        self.requires_attention.iter().filter(|i| !i.resolved)
    }

    pub fn unresolved_issue_count(&self) -> usize {
        self.unresolved_issues().count()
    }
}

/// Notes were written as plain strings by early clients and as `{text}`
/// objects by later ones. Both shapes coerce to a string; anything else is
/// dropped rather than failing the whole garden.
fn coerce_notes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Object(map) => map
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect())
}

impl Entity for Garden {
    const COLLECTION: &'static str = "gardens";

    fn from_document(doc: &Document) -> Result<Self, CoreError> {
        decode_document(Self::COLLECTION, doc)
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn garden_doc(fields: Value) -> Document {
        match fields {
            Value::Object(map) => Document::new("g1", map),
            _ => panic!("fields must be an object"),
        }
    }

    #[test]
    fn decodes_minimal_document() {
        let doc = garden_doc(json!({ "tenantId": "t1", "name": "אגוז" }));
        let garden = Garden::from_document(&doc).unwrap();
        assert_eq!(garden.id, "g1");
        assert_eq!(garden.name, "אגוז");
        assert_eq!(garden.tenant_id.as_deref(), Some("t1"));
        assert!(garden.requires_attention.is_empty());
        assert!(garden.notes.is_empty());
        assert!(garden.day.is_none());
    }

    #[test]
    fn decodes_full_document() {
        let doc = garden_doc(json!({
            "tenantId": "t1",
            "name": "rose garden",
            "address": "12 Main St",
            "day": "monday",
            "outDays": ["tuesday", "thursday"],
            "imageURL": "https://img.example/g1.jpg",
            "locationURL": "https://waze.com/ul?q=12%20Main%20St",
            "lastVisit": "2026-08-20",
            "visitLogs": [{
                "date": "2026-08-20",
                "tasks": ["mow"],
                "nextVisitTasks": ["prune"],
                "createdAt": "2026-08-20T08:00:00Z"
            }],
            "requiresAttention": [{
                "id": "i1",
                "gardenId": "g1",
                "gardenName": "rose garden",
                "text": "broken sprinkler",
                "resolved": false
            }]
        }));
        let garden = Garden::from_document(&doc).unwrap();
        assert_eq!(garden.day, Some(Weekday::Monday));
        assert_eq!(garden.out_days, vec![Weekday::Tuesday, Weekday::Thursday]);
        assert_eq!(garden.last_visit, NaiveDate::from_ymd_opt(2026, 8, 20));
        assert_eq!(garden.visit_logs.len(), 1);
        assert_eq!(garden.unresolved_issue_count(), 1);
    }

    #[test]
    fn coerces_mixed_note_shapes() {
        let doc = garden_doc(json!({
            "tenantId": "t1",
            "name": "g",
            "notes": ["plain", { "text": "wrapped" }, 7]
        }));
        let garden = Garden::from_document(&doc).unwrap();
        assert_eq!(garden.notes, vec!["plain", "wrapped"]);
    }

    #[test]
    fn counts_only_unresolved_issues() {
        let doc = garden_doc(json!({
            "tenantId": "t1",
            "name": "g",
            "requiresAttention": [
                { "id": "i1", "text": "a", "resolved": false },
                { "id": "i2", "text": "b", "resolved": true },
                { "id": "i3", "text": "c" }
            ]
        }));
        let garden = Garden::from_document(&doc).unwrap();
        assert_eq!(garden.unresolved_issue_count(), 2);
    }

    #[test]
    fn missing_name_is_a_decode_error() {
        let doc = garden_doc(json!({ "tenantId": "t1" }));
        assert!(matches!(
            Garden::from_document(&doc),
            Err(CoreError::Deserialization(_))
        ));
    }
}
