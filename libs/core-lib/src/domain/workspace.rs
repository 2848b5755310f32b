use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{decode_document, Entity};
use crate::{CoreError, Document, Principal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub role: MemberRole,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

/// The tenant boundary. A principal may act within a workspace only if
/// present in `members` (or holds the global operator capability, which the
/// tenant resolver checks separately).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Owner email.
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    // BTreeMap keeps member listings deterministic.
    #[serde(default)]
    pub members: BTreeMap<String, Member>,
}

impl Workspace {
    pub fn has_member(&self, uid: &str) -> bool {
        self.members.contains_key(uid)
    }

    pub fn member_role(&self, uid: &str) -> Option<MemberRole> {
        self.members.get(uid).map(|m| m.role)
    }

    /// Owner or admin member; the callers gating member management use this.
    pub fn can_manage(&self, principal: &Principal) -> bool {
        self.owner == principal.email
            || self.member_role(&principal.uid) == Some(MemberRole::Admin)
    }
}

impl Entity for Workspace {
    const COLLECTION: &'static str = "workspaces";

    fn from_document(doc: &Document) -> Result<Self, CoreError> {
        decode_document(Self::COLLECTION, doc)
    }

    fn tenant_id(&self) -> Option<&str> {
        // A workspace is its own tenant.
        Some(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// A request from an existing principal to join a workspace; an admin of the
/// target workspace approves or rejects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
    pub status: JoinRequestStatus,
}

impl Entity for JoinRequest {
    const COLLECTION: &'static str = "workspaceJoinRequests";

    fn from_document(doc: &Document) -> Result<Self, CoreError> {
        decode_document(Self::COLLECTION, doc)
    }

    fn tenant_id(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }
}
