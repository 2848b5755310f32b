use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use core_lib::domain::{name_cmp, Entity, Workspace};
use core_lib::{
    CollectionEvent, CoreError, Document, DocumentStore, Filter, PreferenceStore, Principal,
};

/// Preference key holding the active workspace id across restarts.
pub const SELECTED_WORKSPACE_KEY: &str = "selectedWorkspace";

/// The scoping key every tenant-scoped subscription derives its filter from.
/// `None` while unauthenticated or while no workspace is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub tenant_id: String,
    pub uid: String,
}

/// Static set of privileged principal emails. Operators hold implicit
/// membership in every workspace.
#[derive(Debug, Clone, Default)]
pub struct OperatorAllowList {
    emails: HashSet<String>,
}

impl OperatorAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated allow-list, as read from `OPERATOR_EMAILS`.
    pub fn from_env_value(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn is_operator(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }
}

/// Resolver output: candidate workspaces for the signed-in principal plus the
/// active selection.
#[derive(Debug, Clone, Default)]
pub struct TenantState {
    pub loading: bool,
    pub signed_in: bool,
    pub is_operator: bool,
    /// Candidates, sorted by name. Operators see every workspace.
    pub workspaces: Vec<Workspace>,
    pub active: Option<String>,
}

impl TenantState {
    /// Signed in but member of nothing: the caller must deny access to
    /// tenant-scoped data until membership exists.
    pub fn pending_access(&self) -> bool {
        self.signed_in && !self.loading && self.workspaces.is_empty()
    }
}

/// Active-workspace selection policy, applied on every workspace snapshot:
/// keep the current selection while it remains a candidate, otherwise restore
/// the persisted one, otherwise fall back to the first candidate.
fn choose_active(
    current: Option<&str>,
    persisted: Option<&str>,
    candidates: &[Workspace],
) -> Option<String> {
    let is_candidate = |id: &str| candidates.iter().any(|w| w.id == id);
    current
        .filter(|id| is_candidate(id))
        .or_else(|| persisted.filter(|id| is_candidate(id)))
        .map(str::to_string)
        .or_else(|| candidates.first().map(|w| w.id.clone()))
}

/// Subscribes to the workspace collection and resolves the active tenant for
/// the current principal. The single explicit writer for the active-tenant
/// cell is [`TenantResolver::select_workspace`]; everything else only reads
/// the scope channel.
pub struct TenantResolver {
    inner: Arc<ResolverInner>,
    task: JoinHandle<()>,
}

struct ResolverInner {
    prefs: Arc<dyn PreferenceStore>,
    allow_list: OperatorAllowList,
    state_tx: watch::Sender<TenantState>,
    scope_tx: watch::Sender<Option<Scope>>,
    principal: Mutex<Option<Principal>>,
}

impl TenantResolver {
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        principal_rx: watch::Receiver<Option<Principal>>,
        prefs: Arc<dyn PreferenceStore>,
        allow_list: OperatorAllowList,
    ) -> Self {
        let (state_tx, _) = watch::channel(TenantState {
            loading: true,
            ..TenantState::default()
        });
        let (scope_tx, _) = watch::channel(None);
        let inner = Arc::new(ResolverInner {
            prefs,
            allow_list,
            state_tx,
            scope_tx,
            principal: Mutex::new(None),
        });
        let task = tokio::spawn(run(store, principal_rx, Arc::clone(&inner)));
        Self { inner, task }
    }

    pub fn state(&self) -> watch::Receiver<TenantState> {
        self.inner.state_tx.subscribe()
    }

    /// The scoping channel consumed by every tenant-scoped subscription.
    pub fn scope(&self) -> watch::Receiver<Option<Scope>> {
        self.inner.scope_tx.subscribe()
    }

    /// Explicit workspace switch. Persists the choice; automatic fallback
    /// selection never does, so an explicit choice survives transient
    /// membership changes.
    pub fn select_workspace(&self, workspace_id: &str) -> Result<(), CoreError> {
        self.inner.select(workspace_id)
    }
}

impl Drop for TenantResolver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: Arc<dyn DocumentStore>,
    mut principal_rx: watch::Receiver<Option<Principal>>,
    inner: Arc<ResolverInner>,
) {
    loop {
        let principal = principal_rx.borrow_and_update().clone();
        inner.set_principal(principal.clone());

        let Some(principal) = principal else {
            inner.clear();
            if principal_rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        inner.begin_loading(&principal);
        // The workspace collection is small; membership filtering happens
        // client-side so operators can see every tenant.
        let mut sub = store.subscribe_collection(Workspace::COLLECTION, Filter::All);

        loop {
            tokio::select! {
                changed = principal_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    // Tear down and resubscribe under the new principal.
                    break;
                }
                event = sub.events.recv() => match event {
                    Some(CollectionEvent::Snapshot(docs)) => {
                        inner.apply_snapshot(&principal, &docs);
                    }
                    Some(CollectionEvent::Error(msg)) => {
                        warn!(error = %msg, "workspace subscription failed; resolution stalled");
                        inner.stall();
                    }
                    None => {
                        inner.stall();
                        if principal_rx.changed().await.is_err() {
                            return;
                        }
                        break;
                    }
                },
            }
        }
    }
}

impl ResolverInner {
    fn set_principal(&self, principal: Option<Principal>) {
        let mut slot = self.principal.lock().unwrap_or_else(|e| e.into_inner());
        *slot = principal;
    }

    fn current_principal(&self) -> Option<Principal> {
        self.principal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Signed out: everything resets except the persisted selection, which is
    /// left intact for the next session.
    fn clear(&self) {
        self.state_tx.send_replace(TenantState::default());
        self.scope_tx.send_if_modified(|scope| {
            let changed = scope.is_some();
            *scope = None;
            changed
        });
    }

    fn begin_loading(&self, principal: &Principal) {
        let is_operator = self.allow_list.is_operator(&principal.email);
        self.state_tx.send_replace(TenantState {
            loading: true,
            signed_in: true,
            is_operator,
            workspaces: Vec::new(),
            active: None,
        });
        self.scope_tx.send_if_modified(|scope| {
            let changed = scope.is_some();
            *scope = None;
            changed
        });
    }

    fn stall(&self) {
        self.state_tx.send_modify(|state| state.loading = true);
    }

    fn apply_snapshot(&self, principal: &Principal, docs: &[Document]) {
        let is_operator = self.allow_list.is_operator(&principal.email);
        let mut candidates: Vec<Workspace> = docs
            .iter()
            .filter_map(|doc| match Workspace::from_document(doc) {
                Ok(ws) => Some(ws),
                Err(e) => {
                    warn!(doc = %doc.id, error = %e, "skipping undecodable workspace");
                    None
                }
            })
            .filter(|ws| is_operator || ws.has_member(&principal.uid))
            .collect();
        candidates.sort_by(|a, b| name_cmp(&a.name, &b.name));

        let persisted = self.prefs.get(SELECTED_WORKSPACE_KEY);
        self.state_tx.send_modify(|state| {
            let active = choose_active(
                state.active.as_deref(),
                persisted.as_deref(),
                &candidates,
            );
            debug!(?active, candidates = candidates.len(), "workspace snapshot applied");
            *state = TenantState {
                loading: false,
                signed_in: true,
                is_operator,
                workspaces: candidates,
                active,
            };
        });
        self.publish_scope();
    }

    fn select(&self, workspace_id: &str) -> Result<(), CoreError> {
        let known = self
            .state_tx
            .borrow()
            .workspaces
            .iter()
            .any(|w| w.id == workspace_id);
        if !known {
            return Err(CoreError::Validation(format!(
                "not a member of workspace {workspace_id}"
            )));
        }
        self.state_tx
            .send_modify(|state| state.active = Some(workspace_id.to_string()));
        self.prefs.set(SELECTED_WORKSPACE_KEY, workspace_id);
        self.publish_scope();
        Ok(())
    }

    fn publish_scope(&self) {
        let active = self.state_tx.borrow().active.clone();
        let next = match (active, self.current_principal()) {
            (Some(tenant_id), Some(principal)) => Some(Scope {
                tenant_id,
                uid: principal.uid,
            }),
            _ => None,
        };
        self.scope_tx.send_if_modified(|scope| {
            if *scope == next {
                false
            } else {
                *scope = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace(id: &str, name: &str) -> Workspace {
        let fields = json!({ "name": name });
        let doc = Document::new(id, fields.as_object().unwrap().clone());
        Workspace::from_document(&doc).unwrap()
    }

    #[test]
    fn allow_list_parsing_trims_and_lowercases() {
        let list = OperatorAllowList::from_env_value(" Boss@Example.com , ,ops@example.com");
        assert!(list.is_operator("boss@example.com"));
        assert!(list.is_operator("OPS@example.com"));
        assert!(!list.is_operator("staff@example.com"));
    }

    #[test]
    fn choose_active_keeps_current_selection() {
        let candidates = vec![workspace("w1", "a"), workspace("w2", "b")];
        assert_eq!(
            choose_active(Some("w2"), Some("w1"), &candidates),
            Some("w2".to_string())
        );
    }

    #[test]
    fn choose_active_restores_persisted_selection() {
        let candidates = vec![workspace("w1", "a"), workspace("w2", "b")];
        assert_eq!(
            choose_active(None, Some("w2"), &candidates),
            Some("w2".to_string())
        );
    }

    #[test]
    fn choose_active_falls_back_to_first_candidate() {
        let candidates = vec![workspace("w1", "a"), workspace("w2", "b")];
        assert_eq!(
            choose_active(None, Some("gone"), &candidates),
            Some("w1".to_string())
        );
        assert_eq!(choose_active(None, None, &candidates), Some("w1".to_string()));
    }

    #[test]
    fn choose_active_with_no_candidates_is_none() {
        assert_eq!(choose_active(Some("w1"), Some("w1"), &[]), None);
    }

    #[test]
    fn choose_active_is_idempotent() {
        let candidates = vec![workspace("w1", "a"), workspace("w2", "b")];
        let first = choose_active(None, Some("w2"), &candidates);
        let second = choose_active(first.as_deref(), Some("w2"), &candidates);
        assert_eq!(first, second);
    }

    #[test]
    fn pending_access_requires_settled_empty_candidates() {
        let mut state = TenantState {
            loading: false,
            signed_in: true,
            ..TenantState::default()
        };
        assert!(state.pending_access());

        state.loading = true;
        assert!(!state.pending_access());

        state.loading = false;
        state.workspaces = vec![workspace("w1", "a")];
        assert!(!state.pending_access());

        state.signed_in = false;
        state.workspaces.clear();
        assert!(!state.pending_access());
    }
}
