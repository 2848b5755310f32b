use serde::{Deserialize, Serialize};

use super::{decode_document, Entity};
use crate::{CoreError, Document};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    pub id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default = "default_qty")]
    pub qty: u32,
    #[serde(default)]
    pub date: Option<String>,
}

fn default_qty() -> u32 {
    1
}

impl Entity for ShoppingItem {
    const COLLECTION: &'static str = "shopping";

    fn from_document(doc: &Document) -> Result<Self, CoreError> {
        decode_document(Self::COLLECTION, doc)
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}
