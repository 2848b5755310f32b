use serde::{Deserialize, Serialize};

use super::{decode_document, Entity};
use crate::{CoreError, Document};

/// Priority band for a task; `c` sorts first in the worklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLevel {
    A,
    B,
    C,
}

impl TaskLevel {
    /// Lower rank sorts earlier, matching the staff convention.
    pub fn rank(&self) -> u8 {
        match self {
            TaskLevel::C => 0,
            TaskLevel::B => 1,
            TaskLevel::A => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub level: Option<TaskLevel>,
}

impl Entity for Task {
    const COLLECTION: &'static str = "tasks";

    fn from_document(doc: &Document) -> Result<Self, CoreError> {
        decode_document(Self::COLLECTION, doc)
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}
