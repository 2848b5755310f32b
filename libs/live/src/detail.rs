use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use core_lib::domain::{Entity, Garden};
use core_lib::{Document, DocumentEvent, DocumentStore, DocumentSubscription};

use crate::tenant::Scope;

/// Derived state of a single garden's detail view.
#[derive(Debug, Clone, Default)]
pub struct GardenDetailState {
    pub garden: Option<Garden>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Re-evaluates the latest document against the active scope. Access is
/// checked on every snapshot and again on every tenant change, so switching
/// workspaces while a foreign garden is open denies it immediately.
fn evaluate(doc: Option<&Document>, scope: &Scope) -> GardenDetailState {
    match doc {
        None => GardenDetailState {
            garden: None,
            loading: false,
            error: Some("Garden not found".to_string()),
        },
        Some(doc) => match Garden::from_document(doc) {
            Ok(garden) if garden.tenant_id.as_deref() == Some(scope.tenant_id.as_str()) => {
                GardenDetailState {
                    garden: Some(garden),
                    loading: false,
                    error: None,
                }
            }
            Ok(_) => GardenDetailState {
                garden: None,
                loading: false,
                error: Some("Access denied".to_string()),
            },
            Err(e) => GardenDetailState {
                garden: None,
                loading: false,
                error: Some(e.to_string()),
            },
        },
    }
}

/// Live projection of one garden document, access-checked against the active
/// tenant. While no scope is resolved (signed out, or no workspace yet) the
/// projection holds no subscription and publishes an empty, errorless state.
pub struct GardenProjection {
    state_rx: watch::Receiver<GardenDetailState>,
    task: JoinHandle<()>,
}

impl GardenProjection {
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        scope_rx: watch::Receiver<Option<Scope>>,
        garden_id: impl Into<String>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(GardenDetailState::default());
        let task = tokio::spawn(run(store, scope_rx, garden_id.into(), state_tx));
        Self { state_rx, task }
    }

    pub fn state(&self) -> watch::Receiver<GardenDetailState> {
        self.state_rx.clone()
    }
}

impl Drop for GardenProjection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: Arc<dyn DocumentStore>,
    mut scope_rx: watch::Receiver<Option<Scope>>,
    garden_id: String,
    state_tx: watch::Sender<GardenDetailState>,
) {
    loop {
        // Unscoped: empty state, not an error, and no subscription held.
        if scope_rx.borrow_and_update().is_none() {
            state_tx.send_replace(GardenDetailState::default());
            if scope_rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        state_tx.send_replace(GardenDetailState {
            loading: true,
            ..GardenDetailState::default()
        });
        let mut sub: Option<DocumentSubscription> =
            Some(store.subscribe_document(Garden::COLLECTION, &garden_id));
        // Latest store-side view of the document, kept so a tenant change
        // alone can be re-evaluated without another fetch.
        let mut latest: Option<Document> = None;
        let mut seen_snapshot = false;

        loop {
            tokio::select! {
                changed = scope_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    match scope_rx.borrow_and_update().clone() {
                        // Sign-out or lost tenant tears the subscription down.
                        None => break,
                        Some(scope) => {
                            if seen_snapshot {
                                state_tx.send_replace(evaluate(latest.as_ref(), &scope));
                            }
                        }
                    }
                }
                event = async { sub.as_mut().expect("guarded by arm condition").events.recv().await },
                    if sub.is_some() =>
                {
                    match event {
                        Some(DocumentEvent::Snapshot(doc)) => {
                            latest = doc;
                            seen_snapshot = true;
                            if let Some(scope) = scope_rx.borrow().clone() {
                                state_tx.send_replace(evaluate(latest.as_ref(), &scope));
                            }
                        }
                        Some(DocumentEvent::Error(msg)) => {
                            warn!(garden = %garden_id, error = %msg, "garden subscription failed");
                            state_tx.send_modify(|state| {
                                state.loading = false;
                                state.error = Some(msg);
                            });
                        }
                        None => {
                            sub = None;
                        }
                    }
                }
            }
        }
    }
}
