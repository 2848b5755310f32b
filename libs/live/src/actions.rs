use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use core_lib::domain::{
    Entity, Garden, Issue, JoinRequest, JoinRequestStatus, Member, MemberRole, ShoppingItem,
    Task, TaskLevel, VisitLog, Weekday, WeekPlan, Workspace,
};
use core_lib::{CoreError, DocumentStore, Principal};

use crate::tenant::Scope;

/// Write-side facade over the document store. Every mutation stamps the
/// active scope so a document can never land in a foreign tenant, and every
/// error from the store propagates to the caller unchanged.
pub struct Actions {
    store: Arc<dyn DocumentStore>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn require_nonempty(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Minimal query-string escaping for the generated navigation link.
fn waze_link(address: &str) -> String {
    let encoded: String = address
        .chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '&' => "%26".to_string(),
            '#' => "%23".to_string(),
            '?' => "%3F".to_string(),
            other => other.to_string(),
        })
        .collect();
    format!("https://waze.com/ul?q={encoded}")
}

impl Actions {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // --- tasks ---

    pub async fn add_task(
        &self,
        scope: &Scope,
        title: &str,
        text: &str,
        level: Option<TaskLevel>,
    ) -> Result<String, CoreError> {
        require_nonempty("title", title)?;
        let fields = object(json!({
            "tenantId": scope.tenant_id,
            "userId": scope.uid,
            "title": title.trim(),
            "text": text,
            "done": false,
            "date": Utc::now().date_naive().to_string(),
            "level": level,
        }));
        let id = self.store.add_document(Task::COLLECTION, fields).await?;
        info!(task = %id, "task added");
        Ok(id)
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        title: &str,
        text: &str,
        level: Option<TaskLevel>,
    ) -> Result<(), CoreError> {
        require_nonempty("title", title)?;
        let fields = object(json!({
            "title": title.trim(),
            "text": text,
            "level": level,
        }));
        self.store
            .update_fields(Task::COLLECTION, task_id, fields)
            .await
    }

    pub async fn set_task_done(&self, task_id: &str, done: bool) -> Result<(), CoreError> {
        let fields = object(json!({ "done": done }));
        self.store
            .update_fields(Task::COLLECTION, task_id, fields)
            .await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), CoreError> {
        self.store.delete_document(Task::COLLECTION, task_id).await
    }

    // --- shopping ---

    pub async fn add_shopping_item(
        &self,
        scope: &Scope,
        title: &str,
        qty: u32,
    ) -> Result<String, CoreError> {
        require_nonempty("title", title)?;
        let fields = object(json!({
            "tenantId": scope.tenant_id,
            "userId": scope.uid,
            "title": title.trim(),
            "qty": qty.max(1),
            "date": Utc::now().date_naive().to_string(),
        }));
        self.store
            .add_document(ShoppingItem::COLLECTION, fields)
            .await
    }

    pub async fn delete_shopping_item(&self, item_id: &str) -> Result<(), CoreError> {
        self.store
            .delete_document(ShoppingItem::COLLECTION, item_id)
            .await
    }

    // --- gardens ---

    pub async fn create_garden(
        &self,
        scope: &Scope,
        name: &str,
        address: &str,
    ) -> Result<String, CoreError> {
        require_nonempty("name", name)?;
        let fields = object(json!({
            "tenantId": scope.tenant_id,
            "name": name.trim(),
            "address": address,
            "locationURL": waze_link(address),
            "notes": [],
            "visitLogs": [],
            "requiresAttention": [],
        }));
        let id = self.store.add_document(Garden::COLLECTION, fields).await?;
        info!(garden = %id, "garden created");
        Ok(id)
    }

    pub async fn delete_garden(&self, garden_id: &str) -> Result<(), CoreError> {
        self.store
            .delete_document(Garden::COLLECTION, garden_id)
            .await
    }

    pub async fn set_garden_day(
        &self,
        garden_id: &str,
        day: Option<Weekday>,
    ) -> Result<(), CoreError> {
        let fields = object(json!({ "day": day }));
        self.store
            .update_fields(Garden::COLLECTION, garden_id, fields)
            .await
    }

    pub async fn set_out_days(
        &self,
        garden_id: &str,
        out_days: &[Weekday],
    ) -> Result<(), CoreError> {
        let fields = object(json!({ "outDays": out_days }));
        self.store
            .update_fields(Garden::COLLECTION, garden_id, fields)
            .await
    }

    pub async fn set_image_url(&self, garden_id: &str, url: &str) -> Result<(), CoreError> {
        let fields = object(json!({ "imageURL": url }));
        self.store
            .update_fields(Garden::COLLECTION, garden_id, fields)
            .await
    }

    pub async fn add_note(&self, garden_id: &str, text: &str) -> Result<(), CoreError> {
        require_nonempty("note", text)?;
        let garden = self.fetch_garden(garden_id).await?;
        let mut notes = garden.notes;
        notes.push(text.trim().to_string());
        let fields = object(json!({ "notes": notes }));
        self.store
            .update_fields(Garden::COLLECTION, garden_id, fields)
            .await
    }

    /// Appends a visit log entry and advances the garden's last-visit date.
    pub async fn log_visit(
        &self,
        garden_id: &str,
        date: NaiveDate,
        tasks: Vec<String>,
        next_visit_tasks: Vec<String>,
    ) -> Result<(), CoreError> {
        let garden = self.fetch_garden(garden_id).await?;
        let mut visit_logs = garden.visit_logs;
        visit_logs.push(VisitLog {
            date,
            tasks,
            next_visit_tasks,
            created_at: Some(Utc::now()),
        });
        let fields = object(json!({
            "visitLogs": visit_logs,
            "lastVisit": date,
        }));
        self.store
            .update_fields(Garden::COLLECTION, garden_id, fields)
            .await
    }

    // --- garden issues ---
    // Issues live embedded in their garden document, so every issue mutation
    // is a read-modify-write of the parent's requiresAttention array.

    pub async fn report_issue(&self, garden_id: &str, text: &str) -> Result<String, CoreError> {
        require_nonempty("issue text", text)?;
        let garden = self.fetch_garden(garden_id).await?;
        let issue_id = Uuid::new_v4().to_string();
        let mut issues = garden.requires_attention;
        issues.push(Issue {
            id: issue_id.clone(),
            garden_id: garden.id.clone(),
            garden_name: garden.name.clone(),
            text: text.trim().to_string(),
            created_at: Some(Utc::now()),
            resolved: false,
        });
        self.save_issues(garden_id, &issues).await?;
        info!(garden = %garden_id, issue = %issue_id, "issue reported");
        Ok(issue_id)
    }

    pub async fn resolve_issue(&self, garden_id: &str, issue_id: &str) -> Result<(), CoreError> {
        self.set_issue_resolved(garden_id, issue_id, true).await
    }

    pub async fn reopen_issue(&self, garden_id: &str, issue_id: &str) -> Result<(), CoreError> {
        self.set_issue_resolved(garden_id, issue_id, false).await
    }

    pub async fn remove_issue(&self, garden_id: &str, issue_id: &str) -> Result<(), CoreError> {
        let garden = self.fetch_garden(garden_id).await?;
        let mut issues = garden.requires_attention;
        let before = issues.len();
        issues.retain(|i| i.id != issue_id);
        if issues.len() == before {
            return Err(CoreError::NotFound(format!("issue {issue_id}")));
        }
        self.save_issues(garden_id, &issues).await
    }

    async fn set_issue_resolved(
        &self,
        garden_id: &str,
        issue_id: &str,
        resolved: bool,
    ) -> Result<(), CoreError> {
        let garden = self.fetch_garden(garden_id).await?;
        let mut issues = garden.requires_attention;
        let issue = issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| CoreError::NotFound(format!("issue {issue_id}")))?;
        issue.resolved = resolved;
        self.save_issues(garden_id, &issues).await
    }

    async fn fetch_garden(&self, garden_id: &str) -> Result<Garden, CoreError> {
        let doc = self
            .store
            .fetch_document(Garden::COLLECTION, garden_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("garden {garden_id}")))?;
        Garden::from_document(&doc)
    }

    async fn save_issues(&self, garden_id: &str, issues: &[Issue]) -> Result<(), CoreError> {
        let fields = object(json!({ "requiresAttention": issues }));
        self.store
            .update_fields(Garden::COLLECTION, garden_id, fields)
            .await
    }

    // --- workspaces ---

    /// Creates a workspace with the creator as its owner and sole admin
    /// member.
    pub async fn create_workspace(
        &self,
        principal: &Principal,
        name: &str,
        description: &str,
    ) -> Result<String, CoreError> {
        require_nonempty("name", name)?;
        let mut members = BTreeMap::new();
        members.insert(
            principal.uid.clone(),
            Member {
                role: MemberRole::Admin,
                email: principal.email.clone(),
                display_name: principal.display_name.clone(),
                joined_at: Some(Utc::now()),
            },
        );
        let fields = object(json!({
            "name": name.trim(),
            "description": description,
            "owner": principal.email,
            "ownerId": principal.uid,
            "createdAt": Utc::now(),
            "members": members,
        }));
        let id = self
            .store
            .add_document(Workspace::COLLECTION, fields)
            .await?;
        info!(workspace = %id, "workspace created");
        Ok(id)
    }

    pub async fn request_to_join(
        &self,
        principal: &Principal,
        workspace_id: &str,
    ) -> Result<String, CoreError> {
        let fields = object(json!({
            "workspaceId": workspace_id,
            "userId": principal.uid,
            "userEmail": principal.email,
            "displayName": principal.display_name,
            "requestedAt": Utc::now(),
            "status": "pending",
        }));
        self.store
            .add_document(JoinRequest::COLLECTION, fields)
            .await
    }

    /// Adds the requester as a regular member and marks the request approved.
    /// Only an admin of the target workspace (or an operator) may do this,
    /// and only while the request is still pending.
    pub async fn approve_join_request(
        &self,
        principal: &Principal,
        is_operator: bool,
        request_id: &str,
    ) -> Result<(), CoreError> {
        let request = self.fetch_pending_join_request(request_id).await?;
        let workspace = self.fetch_workspace(&request.workspace_id).await?;
        if !is_operator && !workspace.can_manage(principal) {
            return Err(CoreError::AccessDenied);
        }

        let mut members = workspace.members;
        members.insert(
            request.user_id.clone(),
            Member {
                role: MemberRole::Member,
                email: request.user_email.clone(),
                display_name: request.display_name.clone(),
                joined_at: Some(Utc::now()),
            },
        );
        let fields = object(json!({ "members": members }));
        self.store
            .update_fields(Workspace::COLLECTION, &workspace.id, fields)
            .await?;

        self.set_request_status(request_id, JoinRequestStatus::Approved)
            .await
    }

    pub async fn reject_join_request(
        &self,
        principal: &Principal,
        is_operator: bool,
        request_id: &str,
    ) -> Result<(), CoreError> {
        let request = self.fetch_pending_join_request(request_id).await?;
        let workspace = self.fetch_workspace(&request.workspace_id).await?;
        if !is_operator && !workspace.can_manage(principal) {
            return Err(CoreError::AccessDenied);
        }
        self.set_request_status(request_id, JoinRequestStatus::Rejected)
            .await
    }

    async fn fetch_workspace(&self, workspace_id: &str) -> Result<Workspace, CoreError> {
        let doc = self
            .store
            .fetch_document(Workspace::COLLECTION, workspace_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workspace {workspace_id}")))?;
        Workspace::from_document(&doc)
    }

    /// A settled request can not be acted on again; re-approving would
    /// silently re-add the member.
    async fn fetch_pending_join_request(
        &self,
        request_id: &str,
    ) -> Result<JoinRequest, CoreError> {
        let doc = self
            .store
            .fetch_document(JoinRequest::COLLECTION, request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("join request {request_id}")))?;
        let request = JoinRequest::from_document(&doc)?;
        if request.status != JoinRequestStatus::Pending {
            return Err(CoreError::Validation(format!(
                "join request {request_id} is already settled"
            )));
        }
        Ok(request)
    }

    async fn set_request_status(
        &self,
        request_id: &str,
        status: JoinRequestStatus,
    ) -> Result<(), CoreError> {
        let fields = object(json!({ "status": status }));
        self.store
            .update_fields(JoinRequest::COLLECTION, request_id, fields)
            .await
    }

    // --- weekly plans ---

    pub async fn save_week(
        &self,
        scope: &Scope,
        week_start_date: NaiveDate,
        week_end_date: Option<NaiveDate>,
        days: BTreeMap<String, Vec<String>>,
    ) -> Result<String, CoreError> {
        let fields = object(json!({
            "tenantId": scope.tenant_id,
            "userId": scope.uid,
            "weekStartDate": week_start_date,
            "weekEndDate": week_end_date,
            "days": days,
        }));
        self.store.add_document(WeekPlan::COLLECTION, fields).await
    }

    pub async fn delete_week(&self, week_id: &str) -> Result<(), CoreError> {
        self.store
            .delete_document(WeekPlan::COLLECTION, week_id)
            .await
    }
}
