use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{decode_document, Entity};
use crate::{CoreError, Document};

/// One saved planning week: which gardens are visited on which day. Weeks are
/// personal, so they are scoped by tenant and user together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekPlan {
    pub id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub week_start_date: NaiveDate,
    #[serde(default)]
    pub week_end_date: Option<NaiveDate>,
    /// Day name -> garden ids planned for that day.
    #[serde(default)]
    pub days: BTreeMap<String, Vec<String>>,
}

impl Entity for WeekPlan {
    const COLLECTION: &'static str = "weeks";

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

    #[test]
    fn decodes_week_with_days() {
        let fields = json!({
            "tenantId": "t1",
            "userId": "u1",
            "weekStartDate": "2026-08-30",
            "weekEndDate": "2026-09-03",
            "days": { "sunday": ["g1", "g2"], "monday": [] }
        });
        let doc = Document::new("wk1", fields.as_object().unwrap().clone());
        let week = WeekPlan::from_document(&doc).unwrap();
        assert_eq!(week.week_start_date, NaiveDate::from_ymd_opt(2026, 8, 30).unwrap());
        assert_eq!(week.days["sunday"], vec!["g1", "g2"]);
    }
}
